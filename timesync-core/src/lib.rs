//! Time-Sync Core Library
//!
//! Coordinates clock-offset measurements between pairs of devices that lack a
//! shared clock. A central hub keeps a bidirectional session per device,
//! queries both halves of a pairing simultaneously, and records per-device
//! timestamps and round-trip times. A selection stage condenses a burst of
//! such samples into one high-confidence offset for post-hoc alignment of
//! independently recorded time series.

pub mod clock;
pub mod config;
pub mod hub;
pub mod model;
pub mod protocol;
pub mod selector;
pub mod service;
pub mod storage;

pub use config::Config;
pub use hub::{DeviceConnectedListener, Hub, HubError, Liveness, Session, SEND_BUFFER};
pub use model::{
    AggregatedResult, AutoSyncConfig, AutoSyncJob, AutoSyncStatus, Device, DeviceHealth,
    DeviceKind, MultiSyncRequest, Pairing, PersistentPairing, SyncRecord, SyncStatus,
};
pub use protocol::WireMessage;
pub use selector::{NtpSelector, SampleAnalysis, SelectorConfig, SelectorError};
pub use service::{AutoSyncMonitor, PairingOperator, ServiceError, SyncService};
pub use storage::{Repository, StorageError};
