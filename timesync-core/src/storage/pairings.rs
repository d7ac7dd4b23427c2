//! Durable pairing storage operations.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Repository, StorageError};
use crate::model::PersistentPairing;

const PAIRING_COLUMNS: &str = "pairing_id, device1_id, device2_id, created_at,
       auto_sync_interval_sec, auto_sync_sample_count, auto_sync_interval_ms";

impl Repository {
    /// Saves a durable pairing. The device pair is unique regardless of
    /// order; a second pairing over the same two devices fails with
    /// [`StorageError::PairingExists`].
    pub fn save_pairing(&self, pairing: &PersistentPairing) -> Result<(), StorageError> {
        let (lo, hi) = normalize_pair(&pairing.device1_id, &pairing.device2_id);
        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO pairings (
                    pairing_id, device1_id, device2_id, device_lo, device_hi, created_at,
                    auto_sync_interval_sec, auto_sync_sample_count, auto_sync_interval_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    pairing.pairing_id,
                    pairing.device1_id,
                    pairing.device2_id,
                    lo,
                    hi,
                    pairing.created_at.timestamp_millis(),
                    pairing.auto_sync_interval_sec.map(|v| v as i64),
                    pairing.auto_sync_sample_count.map(|v| v as i64),
                    pairing.auto_sync_interval_ms.map(|v| v as i64),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StorageError::PairingExists(
                    pairing.device1_id.clone(),
                    pairing.device2_id.clone(),
                )),
                Err(e) => Err(StorageError::Database(e)),
            }
        })
    }

    /// Gets a durable pairing by id.
    pub fn get_pairing_by_id(&self, pairing_id: &str) -> Result<PersistentPairing, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIRING_COLUMNS} FROM pairings WHERE pairing_id = ?1"
            ))?;
            let mut rows = stmt.query(params![pairing_id])?;
            match rows.next()? {
                Some(row) => Ok(row_to_pairing(row)?),
                None => Err(StorageError::NotFound(format!("pairing {pairing_id}"))),
            }
        })
    }

    /// Gets all durable pairings that involve the given device.
    pub fn get_pairings_by_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<PersistentPairing>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIRING_COLUMNS} FROM pairings
                 WHERE device1_id = ?1 OR device2_id = ?1
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![device_id], |row| row_to_pairing(row))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Gets the durable pairing over two devices, in either order.
    pub fn get_pairing_by_devices(
        &self,
        device1_id: &str,
        device2_id: &str,
    ) -> Result<Option<PersistentPairing>, StorageError> {
        let (lo, hi) = normalize_pair(device1_id, device2_id);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIRING_COLUMNS} FROM pairings WHERE device_lo = ?1 AND device_hi = ?2"
            ))?;
            let mut rows = stmt.query(params![lo, hi])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_pairing(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Gets all durable pairings, newest first.
    pub fn get_all_pairings(&self) -> Result<Vec<PersistentPairing>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIRING_COLUMNS} FROM pairings ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], |row| row_to_pairing(row))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Deletes a durable pairing. Fails with [`StorageError::NotFound`] when
    /// the pairing does not exist.
    pub fn delete_pairing(&self, pairing_id: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM pairings WHERE pairing_id = ?1",
                params![pairing_id],
            )?;
            if affected == 0 {
                return Err(StorageError::NotFound(format!("pairing {pairing_id}")));
            }
            Ok(())
        })
    }
}

/// Orders a device pair lexicographically so the unordered pair has one
/// canonical representation.
fn normalize_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Converts a database row to a PersistentPairing.
fn row_to_pairing(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistentPairing> {
    let created_ms: i64 = row.get(3)?;
    Ok(PersistentPairing {
        pairing_id: row.get(0)?,
        device1_id: row.get(1)?,
        device2_id: row.get(2)?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_default(),
        auto_sync_interval_sec: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        auto_sync_sample_count: row.get::<_, Option<i64>>(5)?.map(|v| v as usize),
        auto_sync_interval_ms: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
    })
}
