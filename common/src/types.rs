//! Shared data structures between kernel and userspace
//!
//! These structures must be repr(C) to ensure consistent memory layout
//! between eBPF programs and userspace code.

use crate::constants::EVENT_SIZE;

/// Identifier of the thread of control making the call.
///
/// In the kernel program this is the value of `bpf_get_current_pid_tgid()`:
/// the process (tgid) in the upper 32 bits and the thread in the lower 32.
pub type ContextId = u64;

/// Latency event sent from the exit handler to userspace
///
/// Fixed 16-byte record, native byte order, no padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyEvent {
    /// Execution context that made the call
    pub context_id: ContextId,
    /// Time between entry and return (nanoseconds)
    pub latency_ns: u64,
}

impl LatencyEvent {
    pub const fn new(context_id: ContextId, latency_ns: u64) -> Self {
        Self {
            context_id,
            latency_ns,
        }
    }

    /// Process ID (tgid) half of the context identifier
    #[inline(always)]
    pub const fn pid(&self) -> u32 {
        (self.context_id >> 32) as u32
    }

    /// Thread ID half of the context identifier
    #[inline(always)]
    pub const fn tid(&self) -> u32 {
        (self.context_id & 0xFFFF_FFFF) as u32
    }

    /// Encode as the wire record
    pub fn to_ne_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        out[..8].copy_from_slice(&self.context_id.to_ne_bytes());
        out[8..].copy_from_slice(&self.latency_ns.to_ne_bytes());
        out
    }

    /// Decode a wire record read from the event channel
    ///
    /// Returns `None` if fewer than `EVENT_SIZE` bytes are available.
    /// Trailing bytes (perf sample alignment) are ignored.
    pub fn from_ne_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < EVENT_SIZE {
            return None;
        }

        let mut context_id = [0u8; 8];
        let mut latency_ns = [0u8; 8];
        context_id.copy_from_slice(&buf[..8]);
        latency_ns.copy_from_slice(&buf[8..EVENT_SIZE]);

        Some(Self {
            context_id: u64::from_ne_bytes(context_id),
            latency_ns: u64::from_ne_bytes(latency_ns),
        })
    }
}

// Compile-time layout checks
const _: () = {
    assert!(core::mem::size_of::<LatencyEvent>() == EVENT_SIZE);
    assert!(core::mem::size_of::<LatencyEvent>() % core::mem::align_of::<LatencyEvent>() == 0);
};

// Implement Aya's Pod trait for userspace usage
#[cfg(feature = "userspace")]
mod userspace_impls {
    use super::*;

    unsafe impl aya::Pod for LatencyEvent {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_split() {
        let event = LatencyEvent::new((4242u64 << 32) | 4243, 150);

        assert_eq!(event.pid(), 4242);
        assert_eq!(event.tid(), 4243);
    }

    #[test]
    fn test_wire_layout_matches_repr_c() {
        let event = LatencyEvent::new(7, 5);
        let bytes = event.to_ne_bytes();

        assert_eq!(&bytes[..8], &7u64.to_ne_bytes());
        assert_eq!(&bytes[8..], &5u64.to_ne_bytes());

        let raw = unsafe { core::mem::transmute::<LatencyEvent, [u8; EVENT_SIZE]>(event) };
        assert_eq!(raw, bytes);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = [0xAAu8; 24];
        buf[..EVENT_SIZE].copy_from_slice(&LatencyEvent::new(5, 150).to_ne_bytes());

        assert_eq!(LatencyEvent::from_ne_bytes(&buf), Some(LatencyEvent::new(5, 150)));
    }

    #[test]
    fn test_decode_short_record() {
        assert_eq!(LatencyEvent::from_ne_bytes(&[0u8; 15]), None);
        assert_eq!(LatencyEvent::from_ne_bytes(&[]), None);
    }
}
