//! Persistent Storage Module
//!
//! SQLite-backed persistence for measurement records, aggregated burst
//! results, and durable pairings. Timestamps are stored as unix-epoch
//! milliseconds, round-trip times as microseconds, statuses and device
//! kinds as short strings.

mod aggregates;
mod error;
mod pairings;
mod records;

pub use error::StorageError;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Default page size for list queries.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;
/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// SQLite-based repository.
///
/// The connection is shared across tasks behind a mutex; individual
/// statements are short-lived.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    /// Opens or creates a repository database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let repo = Repository {
            conn: Mutex::new(conn),
        };
        repo.initialize_schema()?;
        Ok(repo)
    }

    /// Creates an in-memory repository (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let repo = Repository {
            conn: Mutex::new(conn),
        };
        repo.initialize_schema()?;
        Ok(repo)
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            -- One row per simultaneous measurement
            CREATE TABLE IF NOT EXISTS sync_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device1_id TEXT NOT NULL,
                device1_type TEXT,
                device1_timestamp INTEGER,
                device2_id TEXT NOT NULL,
                device2_type TEXT,
                device2_timestamp INTEGER,
                server_request_time INTEGER NOT NULL,
                server_response_time INTEGER,
                device1_rtt INTEGER,
                device2_rtt INTEGER,
                time_difference INTEGER,
                status TEXT NOT NULL,
                error_message TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_device1 ON sync_records(device1_id);
            CREATE INDEX IF NOT EXISTS idx_records_device2 ON sync_records(device2_id);
            CREATE INDEX IF NOT EXISTS idx_records_created ON sync_records(created_at);

            -- One row per multi-sample burst
            CREATE TABLE IF NOT EXISTS aggregated_results (
                aggregation_id TEXT PRIMARY KEY,
                pairing_id TEXT NOT NULL,
                best_offset INTEGER NOT NULL,
                median_offset INTEGER NOT NULL,
                mean_offset REAL NOT NULL,
                offset_std_dev REAL NOT NULL,
                min_rtt INTEGER NOT NULL,
                max_rtt INTEGER NOT NULL,
                mean_rtt REAL NOT NULL,
                confidence REAL NOT NULL,
                jitter REAL NOT NULL,
                total_samples INTEGER NOT NULL,
                valid_samples INTEGER NOT NULL,
                outlier_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_agg_pairing ON aggregated_results(pairing_id);
            CREATE INDEX IF NOT EXISTS idx_agg_created ON aggregated_results(created_at);

            -- Burst -> constituent measurement links
            CREATE TABLE IF NOT EXISTS aggregation_measurements (
                aggregation_id TEXT NOT NULL,
                measurement_id INTEGER NOT NULL,
                FOREIGN KEY (aggregation_id) REFERENCES aggregated_results(aggregation_id),
                FOREIGN KEY (measurement_id) REFERENCES sync_records(id)
            );

            CREATE INDEX IF NOT EXISTS idx_agg_meas_agg ON aggregation_measurements(aggregation_id);
            CREATE INDEX IF NOT EXISTS idx_agg_meas_meas ON aggregation_measurements(measurement_id);

            -- Durable pairings; device_lo/device_hi normalize the unordered
            -- pair so uniqueness holds regardless of argument order
            CREATE TABLE IF NOT EXISTS pairings (
                pairing_id TEXT PRIMARY KEY,
                device1_id TEXT NOT NULL,
                device2_id TEXT NOT NULL,
                device_lo TEXT NOT NULL,
                device_hi TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                auto_sync_interval_sec INTEGER,
                auto_sync_sample_count INTEGER,
                auto_sync_interval_ms INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_pairings_pair ON pairings(device_lo, device_hi);
            CREATE INDEX IF NOT EXISTS idx_pairings_device1 ON pairings(device1_id);
            CREATE INDEX IF NOT EXISTS idx_pairings_device2 ON pairings(device2_id);
            ",
        )?;
        Ok(())
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    pub(crate) fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }
}

/// Clamps a requested page size into `[1, MAX_PAGE_LIMIT]`, applying the
/// default for non-positive values.
pub(crate) fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    }
}

/// Negative offsets read as zero.
pub(crate) fn clamp_offset(offset: i64) -> i64 {
    offset.max(0)
}
