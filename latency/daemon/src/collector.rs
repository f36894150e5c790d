//! Metrics collection and aggregation
//!
//! Aggregates latency events from the kernel and computes statistics.

use crate::types::*;
use std::collections::{HashMap, HashSet};

/// Samples and thread set for one process
#[derive(Default)]
struct ProcessSamples {
    latencies: Vec<f64>,
    threads: HashSet<u32>,
}

/// Metrics collector for aggregating latency events
#[derive(Default)]
pub struct MetricsCollector {
    /// All latency samples (for percentile calculation)
    all_latencies: Vec<f64>,
    /// Per-process latency samples
    processes: HashMap<u32, ProcessSamples>,
    /// Latency histogram
    histogram: LatencyHistogram,
    /// Total number of events processed
    total_events: u64,
    /// Samples the perf buffers reported as lost
    lost_events: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a latency event to the collector
    ///
    /// # Arguments
    ///
    /// * `event` - Latency event from the eBPF program
    pub fn add_event(&mut self, event: &LatencyEvent) {
        // Convert nanoseconds to microseconds for easier handling
        let latency_us = event.latency_ns as f64 / 1000.0;

        self.all_latencies.push(latency_us);

        let process = self.processes.entry(event.pid()).or_default();
        process.latencies.push(latency_us);
        process.threads.insert(event.tid());

        self.histogram.add_sample(latency_us);

        self.total_events += 1;
    }

    /// Account for samples the kernel could not deliver
    pub fn record_lost(&mut self, count: usize) {
        self.lost_events += count as u64;
    }

    /// Generate aggregated metrics
    ///
    /// # Arguments
    ///
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `target` - The instrumented function
    /// * `probe_stats` - Handler outcome counters from the kernel
    ///
    /// # Returns
    ///
    /// LatencyMetrics with aggregated statistics
    pub fn generate_metrics(
        &self,
        elapsed_secs: u64,
        target: TargetInfo,
        probe_stats: ProbeStats,
    ) -> LatencyMetrics {
        let percentiles = calculate_percentiles(self.all_latencies.clone());

        let processes: HashMap<String, ProcessMetrics> = self
            .processes
            .iter()
            .map(|(pid, samples)| {
                let latencies = &samples.latencies;
                let sum: f64 = latencies.iter().sum();
                let avg = sum / latencies.len() as f64;
                let min = latencies.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

                (
                    pid.to_string(),
                    ProcessMetrics {
                        pid: *pid,
                        threads: samples.threads.len() as u64,
                        events: latencies.len() as u64,
                        min_latency_us: min,
                        max_latency_us: max,
                        avg_latency_us: avg,
                        std_dev_us: calculate_std_dev(latencies, avg),
                    },
                )
            })
            .collect();

        LatencyMetrics {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            target,
            total_events: self.total_events,
            lost_events: self.lost_events,
            processes,
            histogram: self.histogram.clone(),
            percentiles,
            probe_stats,
        }
    }

    /// Get current event count
    pub fn event_count(&self) -> u64 {
        self.total_events
    }

    /// Get lost sample count
    pub fn lost_count(&self) -> u64 {
        self.lost_events
    }

    /// Get number of distinct processes seen
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Get histogram reference
    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pid: u32, tid: u32) -> ContextId {
        ((pid as u64) << 32) | tid as u64
    }

    #[test]
    fn test_collector_basic() {
        let mut collector = MetricsCollector::new();

        collector.add_event(&LatencyEvent::new(ctx(1234, 1234), 500_000));

        assert_eq!(collector.event_count(), 1);
        assert_eq!(collector.process_count(), 1);
    }

    #[test]
    fn test_histogram() {
        let mut collector = MetricsCollector::new();

        // Add events in different buckets
        let latencies = vec![500, 2000, 7000, 30000, 75000, 150000]; // in microseconds

        for &latency_us in &latencies {
            collector.add_event(&LatencyEvent::new(ctx(1234, 1234), latency_us * 1000));
        }

        let histogram = collector.histogram();
        assert_eq!(histogram.bucket_0_1ms, 1);
        assert_eq!(histogram.bucket_1_5ms, 1);
        assert_eq!(histogram.bucket_5_10ms, 1);
        assert_eq!(histogram.bucket_10_50ms, 1);
        assert_eq!(histogram.bucket_50_100ms, 1);
        assert_eq!(histogram.bucket_100ms_plus, 1);
        assert_eq!(histogram.total_count(), 6);
    }

    #[test]
    fn test_per_process_metrics() {
        let mut collector = MetricsCollector::new();

        collector.add_event(&LatencyEvent::new(ctx(10, 11), 1_000_000));
        collector.add_event(&LatencyEvent::new(ctx(10, 12), 3_000_000));
        collector.add_event(&LatencyEvent::new(ctx(10, 12), 2_000_000));
        collector.add_event(&LatencyEvent::new(ctx(20, 20), 150));
        collector.record_lost(3);

        let metrics = collector.generate_metrics(5, TargetInfo::default(), ProbeStats::default());

        assert_eq!(metrics.total_events, 4);
        assert_eq!(metrics.lost_events, 3);
        assert_eq!(metrics.processes.len(), 2);

        let p10 = &metrics.processes["10"];
        assert_eq!(p10.events, 3);
        assert_eq!(p10.threads, 2);
        assert_eq!(p10.min_latency_us, 1000.0);
        assert_eq!(p10.max_latency_us, 3000.0);
        assert_eq!(p10.avg_latency_us, 2000.0);

        let p20 = &metrics.processes["20"];
        assert_eq!(p20.events, 1);
        assert_eq!(p20.std_dev_us, 0.0);
    }
}
