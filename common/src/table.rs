//! Correlation table contract
//!
//! Maps an execution context to the start timestamp of its in-flight call.
//! Implementations are fixed-capacity and never block: the kernel program
//! backs it with a BPF hash map, userspace with an atomic open-addressing
//! table.

use crate::types::ContextId;

/// The table is at capacity and the key is not already present.
///
/// Existing entries are never evicted to make room: the new call simply
/// produces no sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull;

/// Fixed-capacity store of pending start timestamps
pub trait CorrelationTable {
    /// Insert or overwrite the start time for `ctx`.
    ///
    /// Overwriting an existing key always succeeds. Inserting a new key
    /// into a full table fails with `TableFull`.
    fn upsert(&self, ctx: ContextId, start_ns: u64) -> Result<(), TableFull>;

    /// Read and remove the start time for `ctx`.
    fn take(&self, ctx: ContextId) -> Option<u64>;
}

impl<T: CorrelationTable + ?Sized> CorrelationTable for &T {
    #[inline(always)]
    fn upsert(&self, ctx: ContextId, start_ns: u64) -> Result<(), TableFull> {
        (**self).upsert(ctx, start_ns)
    }

    #[inline(always)]
    fn take(&self, ctx: ContextId) -> Option<u64> {
        (**self).take(ctx)
    }
}
