//! BPF map definitions for latency tracking
//!
//! Defines the maps used for communication between kernel and userspace,
//! and for storing in-flight call state.

use aya_ebpf::{
    macros::map,
    maps::{HashMap, PerCpuArray, PerfEventArray},
};
use latency_common::{constants::*, types::*};

/// Map to store call start timestamps
///
/// Key: pid_tgid of the calling thread
/// Value: u64 timestamp in nanoseconds
///
/// Written on function entry, removed on the matching return. When full,
/// updates for new keys fail with -E2BIG and the call goes unsampled.
#[map]
pub static START_TIMES: HashMap<ContextId, u64> =
    HashMap::with_max_entries(MAX_IN_FLIGHT_CALLS, 0);

/// Perf event array to send latency events to userspace
///
/// One ring per CPU; a full ring drops the sample and the userspace
/// reader sees it in its lost count.
#[map]
pub static EVENTS: PerfEventArray<LatencyEvent> = PerfEventArray::new(0);

/// Per-CPU handler outcome counters
///
/// Index: STAT_* constant
/// Value: u64 counter, summed across CPUs by userspace
#[map]
pub static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(MAX_STATS, 0);
