//! Download pacing in 250 ms quota windows.
//!
//! A rate of `R` bytes per second releases `R / 4` bytes per window. A rate
//! of zero (or below) disables pacing entirely. The limiter itself never
//! sleeps — it tells the caller when the next refill is due, so the caller
//! can race that instant against its own deadline.

use std::time::Duration;

use tokio::time::Instant;

/// Spacing between quota refills.
pub const REFILL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of asking the limiter for permission to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Read up to this many bytes now.
    Allow(usize),
    /// Quota exhausted; wait until the instant, then call [`RateLimiter::refill`].
    Starved(Instant),
}

/// Quota state for one connection.
#[derive(Debug, Default)]
pub struct RateLimiter {
    quota: usize,
    next_refill: Option<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp a read of `room` bytes against the current quota.
    ///
    /// On the first starvation of a window whose refill instant already
    /// passed, the refill happens immediately instead of waiting.
    pub fn grant(&mut self, room: usize, rate: i64) -> Grant {
        if rate <= 0 {
            return Grant::Allow(room);
        }
        if self.quota == 0 {
            let now = Instant::now();
            match self.next_refill {
                Some(at) if at > now => return Grant::Starved(at),
                _ => {
                    self.quota = (rate / 4) as usize;
                    self.next_refill = Some(now + REFILL_INTERVAL);
                    if self.quota == 0 {
                        // rate below 4 bytes/s never releases a full byte
                        return Grant::Starved(now + REFILL_INTERVAL);
                    }
                }
            }
        }
        Grant::Allow(room.min(self.quota))
    }

    /// Refill after a starvation wait has elapsed.
    pub fn refill(&mut self, rate: i64) {
        if rate <= 0 {
            return;
        }
        self.quota = (rate / 4) as usize;
        self.next_refill = Some(Instant::now() + REFILL_INTERVAL);
    }

    /// Account bytes actually read against the quota.
    pub fn consume(&mut self, n: usize, rate: i64) {
        if rate > 0 {
            debug_assert!(n <= self.quota || self.next_refill.is_none());
            self.quota = self.quota.saturating_sub(n);
        }
    }

    /// Remaining quota in the current window.
    pub fn quota(&self) -> usize {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_passes_through() {
        let mut limiter = RateLimiter::new();
        assert_eq!(limiter.grant(4096, 0), Grant::Allow(4096));
        assert_eq!(limiter.grant(4096, -1), Grant::Allow(4096));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_clamps_and_refills() {
        let rate = 1000i64;
        let mut limiter = RateLimiter::new();

        // First starvation refills immediately with a quarter of the rate.
        let Grant::Allow(n) = limiter.grant(4096, rate) else {
            panic!("expected immediate refill");
        };
        assert_eq!(n, 250);
        limiter.consume(250, rate);

        // Exhausted: the limiter points at the next window.
        let Grant::Starved(at) = limiter.grant(4096, rate) else {
            panic!("expected starvation");
        };
        tokio::time::sleep_until(at).await;
        limiter.refill(rate);
        assert_eq!(limiter.quota(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn one_second_budget_is_bounded() {
        let rate = 1000i64;
        let mut limiter = RateLimiter::new();
        let start = Instant::now();
        let mut total = 0usize;

        while Instant::now() - start < Duration::from_secs(1) {
            match limiter.grant(usize::MAX, rate) {
                Grant::Allow(n) => {
                    limiter.consume(n, rate);
                    total += n;
                }
                Grant::Starved(at) => tokio::time::sleep_until(at).await,
            }
        }

        // One initial refill plus four quarter-second refills.
        assert!(total <= (rate + rate / 4) as usize, "read {total} bytes");
        assert!(total >= rate as usize, "read only {total} bytes");
    }
}
