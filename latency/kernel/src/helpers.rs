//! Helper functions for eBPF programs
//!
//! Provides safe wrappers around BPF helper functions and binds the
//! correlation core's table, channel and clock contracts to BPF maps.

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns},
    EbpfContext,
};
use latency_common::{
    ChannelFull, Clock, ContextId, CorrelationTable, EventChannel, LatencyEvent, TableFull,
};

use crate::maps::{EVENTS, START_TIMES, STATS};

/// Update the element whether or not it exists
const BPF_ANY: u64 = 0;

/// Get current monotonic timestamp in nanoseconds
#[inline(always)]
pub fn get_timestamp() -> u64 {
    unsafe { bpf_ktime_get_ns() }
}

/// Get the calling thread's pid_tgid
#[inline(always)]
pub fn get_context_id() -> ContextId {
    unsafe { bpf_get_current_pid_tgid() }
}

/// Increment a statistics counter
///
/// The map is per-CPU, so a plain add cannot race with another CPU.
#[inline(always)]
pub fn increment_stat(stat_id: u32) {
    if let Some(count) = STATS.get_ptr_mut(stat_id) {
        unsafe { *count += 1 };
    }
}

/// `bpf_ktime_get_ns` as a handler clock
pub struct KtimeClock;

impl Clock for KtimeClock {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        get_timestamp()
    }
}

/// START_TIMES hash map as the correlation table
///
/// Only the owning thread ever writes or removes its pid_tgid key, so the
/// lookup followed by delete in `take` cannot interleave with another
/// writer for the same key.
pub struct StartTimes;

impl CorrelationTable for StartTimes {
    #[inline(always)]
    fn upsert(&self, ctx: ContextId, start_ns: u64) -> Result<(), TableFull> {
        START_TIMES
            .insert(&ctx, &start_ns, BPF_ANY)
            .map_err(|_| TableFull)
    }

    #[inline(always)]
    fn take(&self, ctx: ContextId) -> Option<u64> {
        let start_ns = unsafe { *START_TIMES.get(&ctx)? };
        // Only the caller whose delete succeeds owns the start time
        START_TIMES.remove(&ctx).ok()?;
        Some(start_ns)
    }
}

/// EVENTS perf array as the event channel, bound to the current program context
///
/// The perf buffer gives the producer no signal when a CPU ring is full, so
/// `emit` always succeeds here; such drops surface in userspace as the
/// reader's lost-sample count.
pub struct PerfChannel<'a, C: EbpfContext> {
    ctx: &'a C,
}

impl<'a, C: EbpfContext> PerfChannel<'a, C> {
    #[inline(always)]
    pub fn new(ctx: &'a C) -> Self {
        Self { ctx }
    }
}

impl<C: EbpfContext> EventChannel for PerfChannel<'_, C> {
    #[inline(always)]
    fn emit(&self, event: &LatencyEvent) -> Result<(), ChannelFull> {
        // BPF_F_CURRENT_CPU is implied by flags = 0 in aya's output()
        EVENTS.output(self.ctx, event, 0);
        Ok(())
    }
}
