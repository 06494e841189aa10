//! Injected wall-clock capability.
//!
//! The source stamps file creation times from an ambient `time()` call. Per the
//! source's own design notes (redesign §9), this crate takes the clock as a
//! constructor-supplied capability instead, so tests can pin it to a fixed value.

/// A source of "seconds since some epoch" used only to stamp file creation time.
pub trait Clock {
    fn now_secs(&self) -> u32;
}

/// Reads the real wall clock via `SystemTime`. Seconds are truncated to `u32`, which
/// wraps some time in 2106 -- acceptable for a creation-time stamp, matching the header
/// field's own 4-byte width.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
    }
}

/// A clock that always returns the same value, or one that can be advanced manually.
/// Used by tests that need deterministic `created` timestamps.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub std::cell::Cell<u32>);

impl FixedClock {
    pub fn new(secs: u32) -> Self { FixedClock(std::cell::Cell::new(secs)) }

    pub fn advance(&self, secs: u32) { self.0.set(self.0.get() + secs); }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> u32 { self.0.get() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_holds_value() {
        let c = FixedClock::new(100);
        assert_eq!(c.now_secs(), 100);
        c.advance(5);
        assert_eq!(c.now_secs(), 105);
    }

    #[test]
    fn system_clock_is_nonzero() {
        // a real epoch-relative second count should never read back as 0 on any
        // machine running these tests.
        assert!(SystemClock.now_secs() > 0);
    }
}
