//! In-process correlation table, event channel and clock
//!
//! Userspace realizations of the contracts the eBPF program fulfils with
//! BPF maps. They let the correlation handlers run, and be exercised under
//! real thread contention, without a privileged runtime. `LocalProbe` wires
//! them together to measure calls made inside the current process.
//!
//! Both structures are pre-allocated at construction and never allocate,
//! lock or spin on the handler path.

use crossbeam::queue::ArrayQueue;
use latency_common::{
    constants::{MAX_IN_FLIGHT_CALLS, MAX_STATS},
    ChannelFull, Clock, ContextId, CorrelationTable, EntryHandler, EventChannel, ExitHandler,
    LatencyEvent, TableFull,
};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use crate::{collector::MetricsCollector, types::ProbeStats};

// Slot states. A taken slot becomes TOMBSTONE, which a later claim reuses.
const EMPTY: u8 = 0;
const CLAIMED: u8 = 1;
const FULL: u8 = 2;
const TOMBSTONE: u8 = 3;

/// Fibonacci hashing multiplier (2^64 / golden ratio)
const HASH_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

struct Slot {
    state: AtomicU8,
    key: AtomicU64,
    value: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            key: AtomicU64::new(0),
            value: AtomicU64::new(0),
        }
    }
}

/// Fixed-capacity, lock-free correlation table
///
/// Open addressing with linear probing over twice `capacity` slots, rounded
/// up to a power of two. Slots are claimed with a compare-and-swap on their
/// state. At most `capacity` entries are live; a new key beyond that is
/// rejected.
///
/// A claim takes the first free or tombstoned slot from the key's home, and
/// the table remembers the largest distance any claim has used. Lookups stop
/// at that distance, so their cost follows the worst clustering seen rather
/// than how many distinct keys have passed through.
///
/// A key is only ever upserted or taken by its own execution context, the
/// same assumption the kernel program makes about pid_tgid.
pub struct AtomicStartTable {
    slots: Box<[Slot]>,
    mask: usize,
    capacity: usize,
    len: AtomicUsize,
    max_probe: AtomicUsize,
}

impl AtomicStartTable {
    /// Create a table holding at most `capacity` in-flight calls
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Correlation table capacity must be > 0");

        let slot_count = (capacity * 2).next_power_of_two();
        let slots = (0..slot_count).map(|_| Slot::new()).collect::<Vec<_>>();

        Self {
            slots: slots.into_boxed_slice(),
            mask: slot_count - 1,
            capacity,
            len: AtomicUsize::new(0),
            max_probe: AtomicUsize::new(0),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most slots a lookup inspects
    pub fn probe_len(&self) -> usize {
        self.max_probe.load(Ordering::Acquire) + 1
    }

    /// Whether a call is currently in flight for `ctx`
    pub fn contains(&self, ctx: ContextId) -> bool {
        self.find(ctx).is_some()
    }

    #[inline]
    fn home(&self, ctx: ContextId) -> usize {
        let h = ctx.wrapping_mul(HASH_MULTIPLIER);
        ((h ^ (h >> 32)) as usize) & self.mask
    }

    fn find(&self, ctx: ContextId) -> Option<&Slot> {
        let home = self.home(ctx);

        for i in 0..self.probe_len() {
            let slot = &self.slots[(home + i) & self.mask];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => return None,
                FULL if slot.key.load(Ordering::Acquire) == ctx => return Some(slot),
                _ => {}
            }
        }

        None
    }

    fn claim(&self, ctx: ContextId, start_ns: u64) -> bool {
        let home = self.home(ctx);

        for i in 0..self.slots.len() {
            let slot = &self.slots[(home + i) & self.mask];
            let state = slot.state.load(Ordering::Relaxed);
            if state != EMPTY && state != TOMBSTONE {
                continue;
            }
            if slot
                .state
                .compare_exchange(state, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.max_probe.fetch_max(i, Ordering::AcqRel);
                slot.key.store(ctx, Ordering::Relaxed);
                slot.value.store(start_ns, Ordering::Relaxed);
                slot.state.store(FULL, Ordering::Release);
                return true;
            }
        }

        false
    }
}

impl Default for AtomicStartTable {
    fn default() -> Self {
        Self::new(MAX_IN_FLIGHT_CALLS as usize)
    }
}

impl CorrelationTable for AtomicStartTable {
    fn upsert(&self, ctx: ContextId, start_ns: u64) -> Result<(), TableFull> {
        if let Some(slot) = self.find(ctx) {
            slot.value.store(start_ns, Ordering::Release);
            return Ok(());
        }

        // Reserve room before claiming so concurrent inserts cannot overshoot
        if self.len.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(TableFull);
        }

        if self.claim(ctx, start_ns) {
            Ok(())
        } else {
            self.len.fetch_sub(1, Ordering::AcqRel);
            Err(TableFull)
        }
    }

    fn take(&self, ctx: ContextId) -> Option<u64> {
        let slot = self.find(ctx)?;
        let start_ns = slot.value.load(Ordering::Acquire);

        slot.state
            .compare_exchange(FULL, TOMBSTONE, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        self.len.fetch_sub(1, Ordering::AcqRel);

        Some(start_ns)
    }
}

/// Event channel statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Events accepted by the channel
    pub emitted: u64,
    /// Events dropped because the channel was full
    pub dropped: u64,
    /// Events currently waiting for the consumer
    pub queued: usize,
    /// Maximum number of queued events
    pub capacity: usize,
}

/// Bounded lock-free event channel
///
/// Backed by crossbeam's `ArrayQueue`: any number of producers, emit never
/// blocks, a full queue drops the event and bumps the drop counter.
pub struct QueueChannel {
    queue: ArrayQueue<LatencyEvent>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl QueueChannel {
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Take the oldest queued event
    pub fn pop(&self) -> Option<LatencyEvent> {
        self.queue.pop()
    }

    /// Take every event queued right now
    pub fn drain(&self) -> Vec<LatencyEvent> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

impl EventChannel for QueueChannel {
    fn emit(&self, event: &LatencyEvent) -> Result<(), ChannelFull> {
        match self.queue.push(*event) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(ChannelFull)
            }
        }
    }
}

/// Monotonic nanoseconds since the clock was created
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// The correlation core wired to the in-process table, channel and clock
///
/// Brackets calls made inside this process the way the uprobe pair
/// brackets a traced function, counting handler outcomes into the same
/// STAT_* slots as the eBPF program.
pub struct LocalProbe {
    table: AtomicStartTable,
    channel: QueueChannel,
    clock: MonotonicClock,
    stats: [AtomicU64; MAX_STATS as usize],
}

impl LocalProbe {
    /// # Arguments
    ///
    /// * `table_capacity` - Maximum in-flight calls
    /// * `channel_capacity` - Events buffered between drains
    pub fn new(table_capacity: usize, channel_capacity: usize) -> Self {
        Self {
            table: AtomicStartTable::new(table_capacity),
            channel: QueueChannel::new(channel_capacity),
            clock: MonotonicClock::new(),
            stats: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Run `f` between the entry and exit handlers for `ctx`
    pub fn measure<R>(&self, ctx: ContextId, f: impl FnOnce() -> R) -> R {
        let entry = EntryHandler::new(&self.table, &self.clock);
        let outcome = entry.on_entry(ctx);
        self.bump(outcome.stat_index());

        let result = f();

        let exit = ExitHandler::new(&self.table, &self.channel, &self.clock);
        let outcome = exit.on_exit(ctx);
        self.bump(outcome.stat_index());

        result
    }

    /// Move every queued event into `collector`, returning how many moved
    pub fn drain_into(&self, collector: &mut MetricsCollector) -> usize {
        let events = self.channel.drain();
        for event in &events {
            collector.add_event(event);
        }
        events.len()
    }

    pub fn probe_stats(&self) -> ProbeStats {
        let counters = self
            .stats
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect::<Vec<_>>();
        ProbeStats::from_counters(&counters)
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    fn bump(&self, stat_index: u32) {
        if let Some(counter) = self.stats.get(stat_index as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}
