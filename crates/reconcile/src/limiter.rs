//! Request shaping shared by every verification worker.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Spaces acquisitions evenly at a fixed rate, across every caller.
///
/// Each acquisition reserves the next free slot (at least `1 / rate` after the
/// previous one) and waits for it. There is no burst allowance: in any
/// one-second window at most `rate` acquisitions complete, plus one at the
/// window boundary. Callers queue rather than fail when the limiter is
/// saturated.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `None` when `rate` is zero, which means unlimited.
    pub fn per_second(rate: u64) -> Option<Self> {
        if rate == 0 {
            return None;
        }
        // Rates beyond one per nanosecond are indistinguishable from unlimited.
        let interval = Duration::from_nanos((1_000_000_000 / rate).max(1));
        Some(Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Wait for a slot. Returns `false`, without waiting any further, if
    /// `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            mut next_slot = self.next_slot.lock() => {
                let slot = (*next_slot).max(Instant::now());
                *next_slot = slot + self.interval;
                slot
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep_until(slot) => true,
        }
    }
}
