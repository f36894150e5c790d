//! Monotonic time source used by the handlers

/// Non-decreasing nanosecond clock
pub trait Clock {
    fn now_ns(&self) -> u64;
}

impl<K: Clock + ?Sized> Clock for &K {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}
