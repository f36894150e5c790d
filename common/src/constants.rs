//! Shared constants for the latency probe
//!
//! These constants are used by both the kernel and userspace programs
//! to ensure consistency in behavior and limits.

// ============================================================================
// BPF Map Sizes
// ============================================================================

/// Maximum number of concurrently in-flight calls tracked by the
/// correlation table. Entries for new contexts beyond this are rejected.
pub const MAX_IN_FLIGHT_CALLS: u32 = 10240;

/// Size in bytes of one `LatencyEvent` record on the wire
pub const EVENT_SIZE: usize = 16;

// ============================================================================
// Statistics Counter Indices (for STATS map)
// ============================================================================

/// Entry handler stored a start timestamp
pub const STAT_ENTRIES_RECORDED: u32 = 0;

/// Entry handler could not store a start timestamp (table full)
pub const STAT_ENTRIES_REJECTED: u32 = 1;

/// Exit handler found no pending start for its context
pub const STAT_EXITS_UNMATCHED: u32 = 2;

/// Exit handler discarded a sample because the start was after the exit
pub const STAT_EXITS_CLOCK_SKEW: u32 = 3;

/// Exit handler handed a latency event to the channel
pub const STAT_EVENTS_EMITTED: u32 = 4;

/// Exit handler produced an event the channel refused
pub const STAT_EVENTS_DROPPED: u32 = 5;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 6;
