//! Function Latency Monitor Userspace Library
//!
//! Provides reusable components for loading the eBPF latency probe,
//! consuming its events, and running the correlation core in-process.

pub mod collector;
pub mod events;
pub mod exporter;
pub mod loader;
pub mod local;
pub mod types;

pub use collector::MetricsCollector;
pub use events::EventProcessor;
pub use exporter::{ExporterType, JsonExporter, MetricsExporter};
pub use loader::{AttachTarget, ProbeLoader};
pub use local::{AtomicStartTable, LocalProbe, MonotonicClock, QueueChannel};
pub use types::*;
