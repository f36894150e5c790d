//! Event channel contract
//!
//! Carries completed latency events out of the probe context. Producers are
//! never stalled: under backpressure the event is dropped.

use crate::types::LatencyEvent;

/// The channel had no room for the event; it was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelFull;

/// Bounded, non-blocking, multi-producer transport for latency events
pub trait EventChannel {
    /// Hand an event to the channel without blocking.
    ///
    /// Transports that cannot report a drop to the producer (the kernel perf
    /// buffer) return `Ok` and surface the loss on the consumer side instead.
    fn emit(&self, event: &LatencyEvent) -> Result<(), ChannelFull>;
}

impl<C: EventChannel + ?Sized> EventChannel for &C {
    #[inline(always)]
    fn emit(&self, event: &LatencyEvent) -> Result<(), ChannelFull> {
        (**self).emit(event)
    }
}
