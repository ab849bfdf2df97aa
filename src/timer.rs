//! Wraparound-safe millisecond timers.
//!
//! Link engines keep time as a free running `u32` millisecond counter that
//! wraps roughly every 49.7 days. All comparisons are done on the signed
//! difference of two counter values, so a deadline armed just before the
//! counter wraps still expires correctly just after it.

/// Milliseconds elapsed from `since` to `now`, negative if `since` lies in the future.
#[inline]
pub fn elapsed(now: u32, since: u32) -> i32 {
    now.wrapping_sub(since) as i32
}

/// Milliseconds left until `deadline`, negative once it has passed.
#[inline]
pub fn remaining(now: u32, deadline: u32) -> i32 {
    deadline.wrapping_sub(now) as i32
}

/// True once `now` is strictly past `deadline`.
#[inline]
pub fn expired(now: u32, deadline: u32) -> bool {
    remaining(now, deadline) < 0
}

/// A one-shot deadline on the link clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(u32);

impl Deadline {
    /// Arm a deadline `ms` milliseconds after `now`.
    pub fn after(now: u32, ms: u32) -> Self {
        Deadline(now.wrapping_add(ms))
    }

    pub fn at(self) -> u32 {
        self.0
    }

    pub fn expired(self, now: u32) -> bool {
        expired(now, self.0)
    }

    /// Milliseconds until expiry, clamped at zero.
    pub fn remaining(self, now: u32) -> u32 {
        remaining(now, self.0).max(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_across_wrap() {
        let since = u32::MAX - 10;
        let now = 20u32;
        assert_eq!(elapsed(now, since), 31);
        assert_eq!(elapsed(since, now), -31);
    }

    #[test]
    fn test_deadline_across_wrap() {
        let now = u32::MAX - 5;
        let deadline = Deadline::after(now, 100);
        assert_eq!(deadline.at(), 94);
        assert!(!deadline.expired(now));
        assert!(!deadline.expired(50));
        assert!(!deadline.expired(94));
        assert!(deadline.expired(95));
        assert_eq!(deadline.remaining(44), 50);
        assert_eq!(deadline.remaining(200), 0);
    }

    #[test]
    fn test_naive_comparison_would_fail() {
        // A deadline that wrapped is numerically smaller than "now"
        // but has not expired yet.
        let now = u32::MAX - 1;
        let deadline = Deadline::after(now, 10);
        assert!(deadline.at() < now);
        assert!(!deadline.expired(now));
    }
}
