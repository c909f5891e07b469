//! Token-bucket pacing for outbound calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Raised when a caller would have to wait past the configured bound for a
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueWaitExceeded {
    pub retry_in: Duration,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every outbound attempt.
///
/// `capacity` bounds the burst, `refill_per_sec` is the sustained ceiling.
/// With a capacity of one the bucket degenerates to fixed-interval pacing,
/// which keeps any sliding one-second window at or under the ceiling.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    max_wait: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64, max_wait: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.001),
            max_wait,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting up to the configured bound for a refill.
    ///
    /// Waiters are not strictly ordered; each one re-checks the bucket after
    /// sleeping, so a token freed during the wait goes to whichever waiter
    /// wakes first.
    pub async fn acquire(&self) -> Result<(), QueueWaitExceeded> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                let missing = 1.0 - state.tokens;
                Duration::from_secs_f64(missing / self.refill_per_sec)
            };

            let now = Instant::now();
            if now + wait > deadline {
                return Err(QueueWaitExceeded { retry_in: wait });
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
