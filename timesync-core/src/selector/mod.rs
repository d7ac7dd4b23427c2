//! NTP-Style Sample Selection
//!
//! Condenses a burst of measurement records into one aggregated offset.
//! The pipeline mirrors the classic NTP clock-filter stages:
//!
//! 1. Drop records without round-trip data, compensate each survivor for
//!    one-way delay asymmetry.
//! 2. Keep the top percentile by total round trip (lowest network delay).
//! 3. Score by round-trip symmetry (asymmetric paths rank worse).
//! 4. Remove statistical outliers by offset, reverting when too few samples
//!    would remain.
//! 5. Summarize: median/mean offset, round-trip statistics, jitter, and a
//!    confidence score.
//!
//! Filtering runs on raw round trips before compensation is consumed, so the
//! delay-based ranking is not distorted by the adjustment itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AggregatedResult, SyncRecord};

/// Selection failure reasons.
#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("no measurements provided")]
    NoSamples,
    #[error("no samples with round-trip data")]
    NoRttData,
}

/// Tuning knobs for the selection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Minimum number of samples the filtering stages must leave behind.
    pub min_samples: usize,
    /// Outlier threshold as a multiple of the offset standard deviation.
    pub outlier_threshold: f64,
    /// Fraction of samples (by lowest total round trip) to keep, in (0, 1].
    pub top_percentile: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            min_samples: 3,
            outlier_threshold: 2.0,
            top_percentile: 0.5,
        }
    }
}

/// Per-record derived values used inside the selector.
#[derive(Debug, Clone)]
pub struct SampleAnalysis {
    pub record: SyncRecord,
    /// Sum of both round trips in microseconds.
    pub total_rtt: i64,
    /// Absolute round-trip asymmetry in microseconds.
    pub rtt_difference: i64,
    /// Network-compensated offset in milliseconds.
    pub offset: i64,
    pub is_outlier: bool,
    /// Ranking score; lower is better.
    pub selection_score: f64,
}

/// NTP-style measurement selector.
pub struct NtpSelector {
    config: SelectorConfig,
}

impl NtpSelector {
    /// Creates a selector, replacing zeroed config values with the defaults.
    pub fn new(config: SelectorConfig) -> Self {
        let defaults = SelectorConfig::default();
        let config = SelectorConfig {
            min_samples: if config.min_samples == 0 {
                defaults.min_samples
            } else {
                config.min_samples
            },
            outlier_threshold: if config.outlier_threshold == 0.0 {
                defaults.outlier_threshold
            } else {
                config.outlier_threshold
            },
            top_percentile: if config.top_percentile == 0.0 {
                defaults.top_percentile
            } else {
                config.top_percentile
            },
        };
        NtpSelector { config }
    }

    /// Runs the full selection pipeline over one burst.
    pub fn select_best(&self, records: &[SyncRecord]) -> Result<AggregatedResult, SelectorError> {
        if records.is_empty() {
            return Err(SelectorError::NoSamples);
        }

        let mut analyses = self.filter_by_rtt(records);
        if analyses.is_empty() {
            return Err(SelectorError::NoRttData);
        }

        self.score_by_symmetry(&mut analyses);
        let valid = self.remove_outliers(&mut analyses);

        Ok(summarize(records, &analyses, &valid))
    }

    /// Compensates each complete record for delay asymmetry and keeps the top
    /// percentile by total round trip (lowest delay first).
    pub fn filter_by_rtt(&self, records: &[SyncRecord]) -> Vec<SampleAnalysis> {
        let mut analyses: Vec<SampleAnalysis> = records
            .iter()
            .filter_map(|record| {
                let rtt1 = record.device1_rtt?;
                let rtt2 = record.device2_rtt?;
                let raw_offset = record.time_difference?;

                // RTT/2 gives the one-way delay; microseconds to milliseconds.
                let delay1 = rtt1 as f64 / 2000.0;
                let delay2 = rtt2 as f64 / 2000.0;
                let adjusted = raw_offset as f64 - (delay1 - delay2);

                Some(SampleAnalysis {
                    record: record.clone(),
                    total_rtt: rtt1 + rtt2,
                    rtt_difference: (rtt1 - rtt2).abs(),
                    offset: adjusted.round() as i64,
                    is_outlier: false,
                    selection_score: 0.0,
                })
            })
            .collect();

        if analyses.is_empty() {
            return analyses;
        }

        analyses.sort_by_key(|a| a.total_rtt);

        let mut cutoff = (analyses.len() as f64 * self.config.top_percentile).ceil() as usize;
        if cutoff < self.config.min_samples {
            cutoff = self.config.min_samples.min(analyses.len());
        }
        analyses.truncate(cutoff);
        analyses
    }

    /// Orders samples by a symmetry-penalized score: total round trip plus
    /// twice the round-trip asymmetry. Does not remove samples.
    pub fn score_by_symmetry(&self, analyses: &mut [SampleAnalysis]) {
        for analysis in analyses.iter_mut() {
            analysis.selection_score =
                analysis.total_rtt as f64 + analysis.rtt_difference as f64 * 2.0;
        }
        analyses.sort_by(|a, b| a.selection_score.total_cmp(&b.selection_score));
    }

    /// Flags samples whose offset deviates from the mean by more than the
    /// configured number of standard deviations, returning the survivors.
    /// When flagging would leave fewer than `min_samples`, every sample is
    /// kept and the flags are cleared.
    pub fn remove_outliers(&self, analyses: &mut [SampleAnalysis]) -> Vec<SampleAnalysis> {
        if analyses.len() < self.config.min_samples {
            return analyses.to_vec();
        }

        let (mean, std_dev) = offset_stats(analyses);
        let threshold = std_dev * self.config.outlier_threshold;

        for analysis in analyses.iter_mut() {
            analysis.is_outlier = (analysis.offset as f64 - mean).abs() > threshold;
        }

        let filtered: Vec<SampleAnalysis> = analyses
            .iter()
            .filter(|a| !a.is_outlier)
            .cloned()
            .collect();

        if filtered.len() < self.config.min_samples {
            for analysis in analyses.iter_mut() {
                analysis.is_outlier = false;
            }
            return analyses.to_vec();
        }

        filtered
    }
}

/// Builds the aggregated result over the surviving valid set.
///
/// Aggregation id, pairing id, and creation time are left for the caller to
/// assign.
fn summarize(
    all_records: &[SyncRecord],
    selected: &[SampleAnalysis],
    valid: &[SampleAnalysis],
) -> AggregatedResult {
    let median = median_offset(valid);
    let (mean_offset, offset_std_dev) = offset_stats(valid);
    let (min_rtt, max_rtt, mean_rtt, jitter) = rtt_stats(valid);
    let confidence = confidence_score(valid.len(), offset_std_dev, jitter);

    AggregatedResult {
        aggregation_id: String::new(),
        pairing_id: String::new(),
        best_offset: median,
        median_offset: median,
        mean_offset,
        offset_std_dev,
        min_rtt,
        max_rtt,
        mean_rtt,
        confidence,
        jitter,
        total_samples: all_records.len(),
        valid_samples: valid.len(),
        outlier_count: selected.len() - valid.len(),
        measurements: all_records.to_vec(),
        created_at: 0,
    }
}

/// Mean and population standard deviation of the compensated offsets.
fn offset_stats(analyses: &[SampleAnalysis]) -> (f64, f64) {
    if analyses.is_empty() {
        return (0.0, 0.0);
    }

    let n = analyses.len() as f64;
    let mean = analyses.iter().map(|a| a.offset as f64).sum::<f64>() / n;
    let variance = analyses
        .iter()
        .map(|a| {
            let diff = a.offset as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    (mean, variance.sqrt())
}

/// Median compensated offset; even counts average the two middle values with
/// integer arithmetic.
fn median_offset(analyses: &[SampleAnalysis]) -> i64 {
    if analyses.is_empty() {
        return 0;
    }

    let mut offsets: Vec<i64> = analyses.iter().map(|a| a.offset).collect();
    offsets.sort_unstable();

    let mid = offsets.len() / 2;
    if offsets.len() % 2 == 0 {
        (offsets[mid - 1] + offsets[mid]) / 2
    } else {
        offsets[mid]
    }
}

/// Min/max/mean of total round trips plus jitter (their standard deviation).
fn rtt_stats(analyses: &[SampleAnalysis]) -> (i64, i64, f64, f64) {
    if analyses.is_empty() {
        return (0, 0, 0.0, 0.0);
    }

    let min_rtt = analyses.iter().map(|a| a.total_rtt).min().unwrap_or(0);
    let max_rtt = analyses.iter().map(|a| a.total_rtt).max().unwrap_or(0);

    let n = analyses.len() as f64;
    let mean_rtt = analyses.iter().map(|a| a.total_rtt as f64).sum::<f64>() / n;
    let variance = analyses
        .iter()
        .map(|a| {
            let diff = a.total_rtt as f64 - mean_rtt;
            diff * diff
        })
        .sum::<f64>()
        / n;

    (min_rtt, max_rtt, mean_rtt, variance.sqrt())
}

/// Confidence in [0, 1], weighing sample count, offset consistency, and
/// network stability.
fn confidence_score(valid_samples: usize, offset_std_dev: f64, jitter: f64) -> f64 {
    if valid_samples == 0 {
        return 0.0;
    }

    let sample_factor = (valid_samples as f64 / 10.0).min(1.0);
    let offset_factor = 1.0 - (offset_std_dev / 20.0).min(1.0);
    let jitter_factor = 1.0 - (jitter / 10_000.0).min(1.0);

    let confidence = sample_factor * 0.3 + offset_factor * 0.4 + jitter_factor * 0.3;
    confidence.clamp(0.0, 1.0)
}
