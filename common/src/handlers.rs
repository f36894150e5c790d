//! Entry and exit handlers
//!
//! Pure, allocation-free correlation logic. The table, channel and clock
//! are injected, so the same code runs inside the eBPF program (bound to
//! BPF maps and `bpf_ktime_get_ns`) and in userspace tests.
//!
//! ## State per context
//!
//! ```text
//! NoEntry --on_entry--> Pending --on_exit--> NoEntry
//! ```
//!
//! A pending entry that never sees its exit stays until the same context
//! enters again (last-entry-wins). Recursive calls on one context are not
//! distinguished: the inner entry replaces the outer one.

use crate::{
    channel::EventChannel,
    clock::Clock,
    constants::*,
    table::CorrelationTable,
    types::{ContextId, LatencyEvent},
};

/// What the entry handler did with one invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Start timestamp stored
    Recorded,
    /// Table full, this call will produce no sample
    Rejected,
}

impl EntryOutcome {
    /// Index of the STATS counter this outcome increments
    pub const fn stat_index(&self) -> u32 {
        match self {
            EntryOutcome::Recorded => STAT_ENTRIES_RECORDED,
            EntryOutcome::Rejected => STAT_ENTRIES_REJECTED,
        }
    }
}

/// What the exit handler did with one invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Event handed to the channel
    Emitted(LatencyEvent),
    /// Event built but the channel refused it
    Dropped(LatencyEvent),
    /// No pending start for this context
    Unmatched,
    /// Start timestamp later than the exit timestamp, sample discarded
    ClockSkew { start_ns: u64, exit_ns: u64 },
}

impl ExitOutcome {
    /// Index of the STATS counter this outcome increments
    pub const fn stat_index(&self) -> u32 {
        match self {
            ExitOutcome::Emitted(_) => STAT_EVENTS_EMITTED,
            ExitOutcome::Dropped(_) => STAT_EVENTS_DROPPED,
            ExitOutcome::Unmatched => STAT_EXITS_UNMATCHED,
            ExitOutcome::ClockSkew { .. } => STAT_EXITS_CLOCK_SKEW,
        }
    }
}

/// Runs on function entry: records the start time for the calling context
pub struct EntryHandler<T, K> {
    table: T,
    clock: K,
}

impl<T: CorrelationTable, K: Clock> EntryHandler<T, K> {
    pub const fn new(table: T, clock: K) -> Self {
        Self { table, clock }
    }

    #[inline(always)]
    pub fn on_entry(&self, ctx: ContextId) -> EntryOutcome {
        let start_ns = self.clock.now_ns();

        match self.table.upsert(ctx, start_ns) {
            Ok(()) => EntryOutcome::Recorded,
            Err(_) => EntryOutcome::Rejected,
        }
    }
}

/// Runs on function return: pairs with the pending start and emits latency
pub struct ExitHandler<T, C, K> {
    table: T,
    channel: C,
    clock: K,
}

impl<T: CorrelationTable, C: EventChannel, K: Clock> ExitHandler<T, C, K> {
    pub const fn new(table: T, channel: C, clock: K) -> Self {
        Self {
            table,
            channel,
            clock,
        }
    }

    #[inline(always)]
    pub fn on_exit(&self, ctx: ContextId) -> ExitOutcome {
        let exit_ns = self.clock.now_ns();

        // take() removes the entry, so every path below leaves ctx in NoEntry
        let start_ns = match self.table.take(ctx) {
            Some(ts) => ts,
            None => return ExitOutcome::Unmatched,
        };

        if start_ns > exit_ns {
            return ExitOutcome::ClockSkew { start_ns, exit_ns };
        }

        let event = LatencyEvent::new(ctx, exit_ns - start_ns);

        match self.channel.emit(&event) {
            Ok(()) => ExitOutcome::Emitted(event),
            Err(_) => ExitOutcome::Dropped(event),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::{channel::ChannelFull, table::TableFull};
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    /// Tiny fixed-capacity table, reject-new when full
    struct FakeTable<const N: usize> {
        slots: RefCell<[Option<(ContextId, u64)>; N]>,
    }

    impl<const N: usize> FakeTable<N> {
        fn new() -> Self {
            Self {
                slots: RefCell::new([None; N]),
            }
        }

        fn contains(&self, ctx: ContextId) -> bool {
            self.slots.borrow().iter().any(|s| matches!(s, Some((k, _)) if *k == ctx))
        }

        fn len(&self) -> usize {
            self.slots.borrow().iter().filter(|s| s.is_some()).count()
        }
    }

    impl<const N: usize> CorrelationTable for FakeTable<N> {
        fn upsert(&self, ctx: ContextId, start_ns: u64) -> Result<(), TableFull> {
            let mut slots = self.slots.borrow_mut();
            if let Some(slot) = slots.iter_mut().find(|s| matches!(s, Some((k, _)) if *k == ctx)) {
                *slot = Some((ctx, start_ns));
                return Ok(());
            }
            match slots.iter_mut().find(|s| s.is_none()) {
                Some(slot) => {
                    *slot = Some((ctx, start_ns));
                    Ok(())
                }
                None => Err(TableFull),
            }
        }

        fn take(&self, ctx: ContextId) -> Option<u64> {
            let mut slots = self.slots.borrow_mut();
            let slot = slots.iter_mut().find(|s| matches!(s, Some((k, _)) if *k == ctx))?;
            slot.take().map(|(_, ts)| ts)
        }
    }

    struct FakeChannel {
        capacity: usize,
        events: RefCell<Vec<LatencyEvent>>,
    }

    impl FakeChannel {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                capacity,
                events: RefCell::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<LatencyEvent> {
            self.events.borrow().clone()
        }
    }

    impl EventChannel for FakeChannel {
        fn emit(&self, event: &LatencyEvent) -> Result<(), ChannelFull> {
            let mut events = self.events.borrow_mut();
            if events.len() >= self.capacity {
                return Err(ChannelFull);
            }
            events.push(*event);
            Ok(())
        }
    }

    struct FakeClock(Cell<u64>);

    impl FakeClock {
        fn at(&self, t: u64) -> &Self {
            self.0.set(t);
            self
        }
    }

    impl Clock for FakeClock {
        fn now_ns(&self) -> u64 {
            self.0.get()
        }
    }

    #[test]
    fn test_entry_then_exit_emits_difference() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(100);
        assert_eq!(entry.on_entry(5), EntryOutcome::Recorded);
        clock.at(250);
        assert_eq!(exit.on_exit(5), ExitOutcome::Emitted(LatencyEvent::new(5, 150)));

        assert_eq!(channel.events(), [LatencyEvent::new(5, 150)]);
        assert!(!table.contains(5));
    }

    #[test]
    fn test_exit_without_entry_is_ignored() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(42));
        let exit = ExitHandler::new(&table, &channel, &clock);

        assert_eq!(exit.on_exit(9), ExitOutcome::Unmatched);
        assert!(channel.events().is_empty());
    }

    #[test]
    fn test_second_exit_emits_nothing() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(10);
        entry.on_entry(3);
        clock.at(20);
        assert!(matches!(exit.on_exit(3), ExitOutcome::Emitted(_)));
        clock.at(30);
        assert_eq!(exit.on_exit(3), ExitOutcome::Unmatched);

        assert_eq!(channel.events().len(), 1);
    }

    #[test]
    fn test_last_entry_wins() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(100);
        entry.on_entry(5);
        clock.at(180);
        entry.on_entry(5);
        clock.at(250);
        exit.on_exit(5);

        assert_eq!(channel.events(), [LatencyEvent::new(5, 70)]);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_stuck_pending_does_not_leak_into_other_contexts() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(100);
        entry.on_entry(5);
        clock.at(200);
        entry.on_entry(7);
        clock.at(205);
        exit.on_exit(7);

        assert_eq!(channel.events(), [LatencyEvent::new(7, 5)]);
        assert!(!table.contains(7));
        assert!(table.contains(5));
    }

    #[test]
    fn test_full_table_rejects_new_context() {
        let table = FakeTable::<2>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(10);
        assert_eq!(entry.on_entry(1), EntryOutcome::Recorded);
        assert_eq!(entry.on_entry(2), EntryOutcome::Recorded);
        assert_eq!(entry.on_entry(3), EntryOutcome::Rejected);
        // overwriting an existing context still works at capacity
        clock.at(15);
        assert_eq!(entry.on_entry(1), EntryOutcome::Recorded);

        clock.at(40);
        assert_eq!(exit.on_exit(3), ExitOutcome::Unmatched);
        assert_eq!(exit.on_exit(1), ExitOutcome::Emitted(LatencyEvent::new(1, 25)));
        assert_eq!(exit.on_exit(2), ExitOutcome::Emitted(LatencyEvent::new(2, 30)));
    }

    #[test]
    fn test_clock_skew_discards_and_cleans_up() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(500);
        entry.on_entry(5);
        clock.at(400);
        assert_eq!(
            exit.on_exit(5),
            ExitOutcome::ClockSkew {
                start_ns: 500,
                exit_ns: 400
            }
        );

        assert!(channel.events().is_empty());
        assert!(!table.contains(5));
    }

    #[test]
    fn test_zero_latency_is_emitted() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(8);
        let clock = FakeClock(Cell::new(77));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        entry.on_entry(5);
        assert_eq!(exit.on_exit(5), ExitOutcome::Emitted(LatencyEvent::new(5, 0)));
    }

    #[test]
    fn test_channel_full_drops_event_but_clears_entry() {
        let table = FakeTable::<8>::new();
        let channel = FakeChannel::with_capacity(0);
        let clock = FakeClock(Cell::new(0));
        let entry = EntryHandler::new(&table, &clock);
        let exit = ExitHandler::new(&table, &channel, &clock);

        clock.at(1);
        entry.on_entry(5);
        clock.at(11);
        assert_eq!(exit.on_exit(5), ExitOutcome::Dropped(LatencyEvent::new(5, 10)));
        assert!(!table.contains(5));
    }

    #[test]
    fn test_outcome_stat_indices() {
        assert_eq!(EntryOutcome::Recorded.stat_index(), STAT_ENTRIES_RECORDED);
        assert_eq!(EntryOutcome::Rejected.stat_index(), STAT_ENTRIES_REJECTED);
        assert_eq!(ExitOutcome::Unmatched.stat_index(), STAT_EXITS_UNMATCHED);
        assert_eq!(
            ExitOutcome::Dropped(LatencyEvent::new(1, 1)).stat_index(),
            STAT_EVENTS_DROPPED
        );
    }
}
