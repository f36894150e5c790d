//! Event processing from eBPF perf buffers
//!
//! Handles reading events from per-CPU perf buffers and processing them asynchronously.

use crate::{
    collector::MetricsCollector,
    types::{context_to_string, LatencyEvent},
};
use anyhow::Result;
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use latency_common::constants::EVENT_SIZE;
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::interval};

/// Number of records pulled from one CPU ring per read
const READ_BATCH: usize = 10;

/// Event processor that reads from perf buffers
pub struct EventProcessor {
    collector: Arc<Mutex<MetricsCollector>>,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `collector` - Shared metrics collector
    /// * `verbose` - Log every sample
    pub fn new(collector: Arc<Mutex<MetricsCollector>>, verbose: bool) -> Self {
        Self { collector, verbose }
    }

    /// Spawn per-CPU event readers
    ///
    /// Creates a task for each CPU to read events from its perf buffer.
    ///
    /// # Arguments
    ///
    /// * `perf_array` - Perf event array from the eBPF program
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    pub fn spawn_cpu_readers(&self, mut perf_array: AsyncPerfEventArray<MapData>) -> Result<()> {
        let cpus = online_cpus()?;
        info!("Spawning event readers for {} CPUs", cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let collector = Arc::clone(&self.collector);
            let verbose = self.verbose;

            tokio::spawn(async move {
                let mut buffers = (0..READ_BATCH)
                    .map(|_| BytesMut::with_capacity(EVENT_SIZE))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading events from CPU {}: {}", cpu_id, e);
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        warn!(
                            "perf ring for CPU {} full, dropped {} samples",
                            cpu_id, events.lost
                        );
                    }

                    let decoded = buffers
                        .iter()
                        .take(events.read)
                        .filter_map(|raw| decode_event(raw, verbose))
                        .collect::<Vec<_>>();

                    let mut collector = collector.lock().await;
                    collector.record_lost(events.lost);
                    for event in &decoded {
                        collector.add_event(event);
                    }
                }
            });
        }

        Ok(())
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports collection progress.
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Reporting interval in seconds
    pub fn spawn_progress_reporter(&self, interval_secs: u64) {
        let collector = Arc::clone(&self.collector);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));

            loop {
                ticker.tick().await;

                let collector = collector.lock().await;
                info!(
                    "Progress: {} events collected from {} processes, {} lost",
                    collector.event_count(),
                    collector.process_count(),
                    collector.lost_count()
                );
            }
        });
    }
}

/// Decode one raw perf sample, logging it in verbose mode
fn decode_event(raw: &[u8], verbose: bool) -> Option<LatencyEvent> {
    let event = match LatencyEvent::from_ne_bytes(raw) {
        Some(event) => event,
        None => {
            warn!(
                "Skipping short perf sample: {} bytes, expected {}",
                raw.len(),
                EVENT_SIZE
            );
            return None;
        }
    };

    if verbose {
        debug!(
            "Handler latency: {:.3} ms (PID/TID: {})",
            event.latency_ns as f64 / 1_000_000.0,
            context_to_string(event.context_id)
        );
    }

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_processor_creation() {
        let collector = Arc::new(Mutex::new(MetricsCollector::new()));
        let processor = EventProcessor::new(collector, false);

        assert!(!processor.verbose);
    }

    #[test]
    fn test_decode_event() {
        let raw = LatencyEvent::new((77u64 << 32) | 78, 2_500_000).to_ne_bytes();
        let event = decode_event(&raw, true).unwrap();

        assert_eq!(event.pid(), 77);
        assert_eq!(event.tid(), 78);
        assert_eq!(event.latency_ns, 2_500_000);
    }

    #[test]
    fn test_decode_short_sample() {
        assert!(decode_event(&[0u8; 8], false).is_none());
    }
}
