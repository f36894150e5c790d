//! Userspace type definitions
//!
//! Defines the data structures used by the userspace program for
//! metrics collection and export.
//!
//! ## Organization
//!
//! This module separates kernel and userspace types:
//! - **Kernel Types**: Types shared with the eBPF program (from latency_common)
//! - **Userspace Types**: Types used only in userspace for aggregation and export

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between the kernel eBPF program and userspace
    //!
    //! These are re-exported from the latency-common crate and must
    //! maintain binary compatibility with the eBPF program.

    pub use latency_common::constants;
    pub use latency_common::types::{ContextId, LatencyEvent};
}

// Re-export commonly used kernel types at module level for convenience
pub use kernel::{ContextId, LatencyEvent};

/// Aggregated metrics for export
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LatencyMetrics {
    /// ISO 8601 timestamp when metrics were collected
    pub timestamp: String,
    /// Duration of collection period in seconds
    pub duration_seconds: u64,
    /// Function the probes were attached to
    pub target: TargetInfo,
    /// Total number of latency events captured
    pub total_events: u64,
    /// Events lost because a perf ring was full
    pub lost_events: u64,
    /// Per-process metrics, keyed by PID
    pub processes: HashMap<String, ProcessMetrics>,
    /// Latency histogram across all processes
    pub histogram: LatencyHistogram,
    /// Latency percentiles across all processes
    pub percentiles: Percentiles,
    /// Handler outcome counters read from the kernel program
    pub probe_stats: ProbeStats,
}

/// The instrumented function
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct TargetInfo {
    /// Binary or shared library containing the function
    pub binary: String,
    /// Symbol name of the function
    pub function: String,
    /// Process filter, if the probes were attached to one PID only
    pub pid: Option<i32>,
}

/// Metrics for a single process
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessMetrics {
    /// Process ID (tgid)
    pub pid: u32,
    /// Number of distinct threads that completed a call
    pub threads: u64,
    /// Number of events for this process
    pub events: u64,
    /// Minimum latency in microseconds
    pub min_latency_us: f64,
    /// Maximum latency in microseconds
    pub max_latency_us: f64,
    /// Average latency in microseconds
    pub avg_latency_us: f64,
    /// Standard deviation in microseconds
    pub std_dev_us: f64,
}

/// Latency histogram buckets
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct LatencyHistogram {
    /// 0-1ms bucket
    #[serde(rename = "0-1ms")]
    pub bucket_0_1ms: u64,
    /// 1-5ms bucket
    #[serde(rename = "1-5ms")]
    pub bucket_1_5ms: u64,
    /// 5-10ms bucket
    #[serde(rename = "5-10ms")]
    pub bucket_5_10ms: u64,
    /// 10-50ms bucket
    #[serde(rename = "10-50ms")]
    pub bucket_10_50ms: u64,
    /// 50-100ms bucket
    #[serde(rename = "50-100ms")]
    pub bucket_50_100ms: u64,
    /// 100ms+ bucket
    #[serde(rename = "100ms+")]
    pub bucket_100ms_plus: u64,
}

impl LatencyHistogram {
    /// Add a sample to the appropriate bucket
    ///
    /// # Arguments
    ///
    /// * `latency_us` - Latency in microseconds
    pub fn add_sample(&mut self, latency_us: f64) {
        match latency_us {
            l if l < 1000.0 => self.bucket_0_1ms += 1,
            l if l < 5000.0 => self.bucket_1_5ms += 1,
            l if l < 10000.0 => self.bucket_5_10ms += 1,
            l if l < 50000.0 => self.bucket_10_50ms += 1,
            l if l < 100000.0 => self.bucket_50_100ms += 1,
            _ => self.bucket_100ms_plus += 1,
        }
    }

    /// Get total count across all buckets
    pub fn total_count(&self) -> u64 {
        self.bucket_0_1ms
            + self.bucket_1_5ms
            + self.bucket_5_10ms
            + self.bucket_10_50ms
            + self.bucket_50_100ms
            + self.bucket_100ms_plus
    }
}

/// Latency percentiles
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

/// Handler outcome counters, summed across CPUs
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeStats {
    /// Entries that stored a start timestamp
    pub entries_recorded: u64,
    /// Entries rejected because the correlation table was full
    pub entries_rejected: u64,
    /// Returns with no matching entry
    pub exits_unmatched: u64,
    /// Returns discarded because the start was after the exit
    pub exits_clock_skew: u64,
    /// Events handed to the perf buffer
    pub events_emitted: u64,
    /// Events the channel refused. Always 0 for the perf buffer, whose
    /// drops show up as lost events instead.
    pub events_dropped: u64,
}

impl ProbeStats {
    /// Build from the raw STATS map, indexed by the STAT_* constants
    pub fn from_counters(counters: &[u64]) -> Self {
        use kernel::constants::*;

        let get = |idx: u32| counters.get(idx as usize).copied().unwrap_or(0);

        Self {
            entries_recorded: get(STAT_ENTRIES_RECORDED),
            entries_rejected: get(STAT_ENTRIES_REJECTED),
            exits_unmatched: get(STAT_EXITS_UNMATCHED),
            exits_clock_skew: get(STAT_EXITS_CLOCK_SKEW),
            events_emitted: get(STAT_EVENTS_EMITTED),
            events_dropped: get(STAT_EVENTS_DROPPED),
        }
    }
}

/// Calculate percentiles from a sorted vector of samples
///
/// # Arguments
///
/// * `samples` - Vector of latency values (will be sorted in place)
///
/// # Returns
///
/// Percentiles structure with p50, p75, p90, p95, p99, p999
pub fn calculate_percentiles(mut samples: Vec<f64>) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }

    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let len = samples.len();

    let percentile = |per_mille: usize| {
        let index = std::cmp::min((len * per_mille / 1000).saturating_sub(1), len - 1);
        samples[index]
    };

    Percentiles {
        p50: percentile(500),
        p75: percentile(750),
        p90: percentile(900),
        p95: percentile(950),
        p99: percentile(990),
        p999: percentile(999),
    }
}

/// Calculate standard deviation
///
/// # Arguments
///
/// * `samples` - Slice of values
/// * `mean` - Mean of the values
///
/// # Returns
///
/// Standard deviation
pub fn calculate_std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() <= 1 {
        return 0.0;
    }

    let variance: f64 = samples
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

/// Format a context identifier as "pid/tid"
pub fn context_to_string(ctx: ContextId) -> String {
    format!("{}/{}", ctx >> 32, ctx & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let samples: Vec<f64> = (1..=1000).map(|v| v as f64).collect();
        let p = calculate_percentiles(samples);

        assert_eq!(p.p50, 500.0);
        assert_eq!(p.p99, 990.0);
        assert_eq!(p.p999, 999.0);
    }

    #[test]
    fn test_percentiles_single_sample() {
        let p = calculate_percentiles(vec![42.0]);

        assert_eq!(p.p50, 42.0);
        assert_eq!(p.p999, 42.0);
    }

    #[test]
    fn test_probe_stats_from_counters() {
        let stats = ProbeStats::from_counters(&[10, 1, 2, 0, 7]);

        assert_eq!(stats.entries_recorded, 10);
        assert_eq!(stats.entries_rejected, 1);
        assert_eq!(stats.exits_unmatched, 2);
        assert_eq!(stats.events_emitted, 7);
        assert_eq!(stats.events_dropped, 0);
    }

    #[test]
    fn test_context_to_string() {
        assert_eq!(context_to_string((1234u64 << 32) | 1240), "1234/1240");
    }
}
