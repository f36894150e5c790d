//! Correlation core and shared types for the function latency probe
//!
//! This crate holds the entry/exit correlation logic, the contracts for the
//! correlation table, event channel and clock it runs against, and the
//! record layout shared between the eBPF program and userspace.

#![no_std]

pub mod channel;
pub mod clock;
pub mod constants;
pub mod handlers;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use channel::{ChannelFull, EventChannel};
pub use clock::Clock;
pub use constants::*;
pub use handlers::{EntryHandler, EntryOutcome, ExitHandler, ExitOutcome};
pub use table::{CorrelationTable, TableFull};
pub use types::{ContextId, LatencyEvent};
