//! Domain Model
//!
//! Plain data types shared by the hub, the selector, the services, and the
//! repository. All wall-clock timestamps used in measurement arithmetic are
//! unix-epoch milliseconds; round-trip times are microseconds.

mod auto_sync;
mod device;
mod record;

pub use auto_sync::{AutoSyncConfig, AutoSyncJob, AutoSyncStatus};
pub use device::{Device, DeviceHealth, DeviceKind, Pairing, PersistentPairing, UnknownDeviceKind};
pub use record::{AggregatedResult, MultiSyncRequest, SyncRecord, SyncStatus};
