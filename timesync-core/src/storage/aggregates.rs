//! Aggregated burst result storage operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::records::row_to_record;
use super::{clamp_limit, clamp_offset, Repository, StorageError};
use crate::model::AggregatedResult;

const AGGREGATE_COLUMNS: &str = "aggregation_id, pairing_id, best_offset, median_offset, mean_offset,
       offset_std_dev, min_rtt, max_rtt, mean_rtt, confidence, jitter,
       total_samples, valid_samples, outlier_count, created_at";

impl Repository {
    /// Saves an aggregated result together with its measurement links.
    ///
    /// The aggregate row and the link rows commit in one transaction.
    /// Measurements that were never persisted (id 0) are skipped.
    pub fn save_aggregated_result(&self, result: &AggregatedResult) -> Result<(), StorageError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO aggregated_results (
                    aggregation_id, pairing_id, best_offset, median_offset, mean_offset,
                    offset_std_dev, min_rtt, max_rtt, mean_rtt, confidence, jitter,
                    total_samples, valid_samples, outlier_count, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    result.aggregation_id,
                    result.pairing_id,
                    result.best_offset,
                    result.median_offset,
                    result.mean_offset,
                    result.offset_std_dev,
                    result.min_rtt,
                    result.max_rtt,
                    result.mean_rtt,
                    result.confidence,
                    result.jitter,
                    result.total_samples as i64,
                    result.valid_samples as i64,
                    result.outlier_count as i64,
                    result.created_at,
                ],
            )?;

            for measurement in &result.measurements {
                if measurement.id == 0 {
                    continue;
                }
                tx.execute(
                    "INSERT INTO aggregation_measurements (aggregation_id, measurement_id)
                     VALUES (?1, ?2)",
                    params![result.aggregation_id, measurement.id],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Gets an aggregated result with its linked measurements hydrated.
    pub fn get_aggregated_result(
        &self,
        aggregation_id: &str,
    ) -> Result<AggregatedResult, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGGREGATE_COLUMNS} FROM aggregated_results WHERE aggregation_id = ?1"
            ))?;
            let mut rows = stmt.query(params![aggregation_id])?;
            let mut result = match rows.next()? {
                Some(row) => row_to_aggregate(row)?,
                None => {
                    return Err(StorageError::NotFound(format!(
                        "aggregation {aggregation_id}"
                    )))
                }
            };
            result.measurements = load_measurements(conn, aggregation_id)?;
            Ok(result)
        })
    }

    /// Lists aggregated results, newest first.
    pub fn get_aggregated_results(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGGREGATE_COLUMNS} FROM aggregated_results
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![clamp_limit(limit), clamp_offset(offset)], |row| {
                row_to_aggregate(row)
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Lists aggregated results for one pairing, newest first.
    pub fn get_aggregated_results_by_pairing(
        &self,
        pairing_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGGREGATE_COLUMNS} FROM aggregated_results
                 WHERE pairing_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![pairing_id, clamp_limit(limit), clamp_offset(offset)],
                |row| row_to_aggregate(row),
            )?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }

    /// Lists aggregated results created inside `[start, end]`, newest first.
    pub fn get_aggregated_results_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGGREGATE_COLUMNS} FROM aggregated_results
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
                |row| row_to_aggregate(row),
            )?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::Database)
        })
    }
}

/// Loads all measurements linked to an aggregation, oldest first.
fn load_measurements(
    conn: &Connection,
    aggregation_id: &str,
) -> Result<Vec<crate::model::SyncRecord>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.device1_id, t.device1_type, t.device1_timestamp,
                t.device2_id, t.device2_type, t.device2_timestamp,
                t.server_request_time, t.server_response_time,
                t.device1_rtt, t.device2_rtt, t.time_difference,
                t.status, t.error_message, t.created_at
         FROM sync_records t
         INNER JOIN aggregation_measurements am ON t.id = am.measurement_id
         WHERE am.aggregation_id = ?1
         ORDER BY t.created_at ASC",
    )?;
    let rows = stmt.query_map(params![aggregation_id], |row| row_to_record(row))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::Database)
}

/// Converts a database row to an AggregatedResult without measurements.
fn row_to_aggregate(row: &rusqlite::Row<'_>) -> rusqlite::Result<AggregatedResult> {
    Ok(AggregatedResult {
        aggregation_id: row.get(0)?,
        pairing_id: row.get(1)?,
        best_offset: row.get(2)?,
        median_offset: row.get(3)?,
        mean_offset: row.get(4)?,
        offset_std_dev: row.get(5)?,
        min_rtt: row.get(6)?,
        max_rtt: row.get(7)?,
        mean_rtt: row.get(8)?,
        confidence: row.get(9)?,
        jitter: row.get(10)?,
        total_samples: row.get::<_, i64>(11)? as usize,
        valid_samples: row.get::<_, i64>(12)? as usize,
        outlier_count: row.get::<_, i64>(13)? as usize,
        measurements: Vec::new(),
        created_at: row.get(14)?,
    })
}
