//! Measurement record storage operations.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{clamp_limit, clamp_offset, Repository, StorageError};
use crate::model::{DeviceKind, SyncRecord, SyncStatus};

const RECORD_COLUMNS: &str = "id, device1_id, device1_type, device1_timestamp,
       device2_id, device2_type, device2_timestamp,
       server_request_time, server_response_time,
       device1_rtt, device2_rtt, time_difference,
       status, error_message, created_at";

impl Repository {
    /// Saves a measurement record, assigning its row id into `record.id`.
    pub fn save_sync_record(&self, record: &mut SyncRecord) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_records (
                    device1_id, device1_type, device1_timestamp,
                    device2_id, device2_type, device2_timestamp,
                    server_request_time, server_response_time,
                    device1_rtt, device2_rtt, time_difference,
                    status, error_message, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.device1_id,
                    record.device1_type.map(|k| k.as_str()),
                    record.device1_timestamp,
                    record.device2_id,
                    record.device2_type.map(|k| k.as_str()),
                    record.device2_timestamp,
                    record.server_request_time,
                    record.server_response_time,
                    record.device1_rtt,
                    record.device2_rtt,
                    record.time_difference,
                    record.status.as_str(),
                    record.error_message,
                    record.created_at,
                ],
            )?;
            record.id = conn.last_insert_rowid();
            Ok(())
        })
    }

    /// Gets a single measurement record by row id.
    pub fn get_sync_record(&self, id: i64) -> Result<SyncRecord, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(row_to_record(row)?),
                None => Err(StorageError::NotFound(format!("sync record {id}"))),
            }
        })
    }

    /// Lists measurement records, newest first.
    pub fn get_sync_records(&self, limit: i64, offset: i64) -> Result<Vec<SyncRecord>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![clamp_limit(limit), clamp_offset(offset)], |row| {
                row_to_record(row)
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Lists measurement records that involve the given device, newest first.
    pub fn get_sync_records_by_device(
        &self,
        device_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records
                 WHERE device1_id = ?1 OR device2_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![device_id, clamp_limit(limit), clamp_offset(offset)],
                |row| row_to_record(row),
            )?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Lists measurement records created inside `[start, end]`, newest first.
    pub fn get_sync_records_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records
                 WHERE created_at BETWEEN ?1 AND ?2
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt.query_map(
                params![
                    start.timestamp_millis(),
                    end.timestamp_millis(),
                    clamp_limit(limit),
                    clamp_offset(offset)
                ],
                |row| row_to_record(row),
            )?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }
}

/// Converts a database row to a SyncRecord.
pub(super) fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let status_str: String = row.get(12)?;
    let status = match status_str.as_str() {
        "SUCCESS" => SyncStatus::Success,
        "PARTIAL" => SyncStatus::Partial,
        _ => SyncStatus::Failed,
    };

    Ok(SyncRecord {
        id: row.get(0)?,
        device1_id: row.get(1)?,
        device1_type: parse_kind(row.get::<_, Option<String>>(2)?),
        device1_timestamp: row.get(3)?,
        device2_id: row.get(4)?,
        device2_type: parse_kind(row.get::<_, Option<String>>(5)?),
        device2_timestamp: row.get(6)?,
        server_request_time: row.get(7)?,
        server_response_time: row.get(8)?,
        device1_rtt: row.get(9)?,
        device2_rtt: row.get(10)?,
        time_difference: row.get(11)?,
        status,
        error_message: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn parse_kind(value: Option<String>) -> Option<DeviceKind> {
    value.and_then(|v| v.parse().ok())
}
