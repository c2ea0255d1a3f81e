//! Rate limiter shared by all workers calling the transcription API.
//!
//! Capacity `C` and refill rate `R` define a rolling window of `C / R`
//! seconds; no window of that length ever contains more than `C` grants.
//! The limiter keeps the timestamps of the last `C` grants and a new grant
//! waits until the oldest of them is a full window old, so the bound holds
//! from the very first call: a fresh limiter still allows an initial burst
//! of `C`, but the next grant only comes once that burst has aged out of
//! the window.
//!
//! One grant log per process, guarded by a single fair mutex. A caller that
//! must wait sleeps while holding the lock, so waiters are served strictly
//! in arrival order and none can be starved.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    grants: Mutex<VecDeque<Instant>>,
    capacity: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            grants: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            window: Duration::from_secs_f64(capacity as f64 / refill_per_sec),
        }
    }

    /// Blocks until a grant is allowed, then records it. Cancellation-safe:
    /// the log is only mutated after any waiting is over, so dropping the
    /// future consumes nothing.
    pub async fn acquire(&self) {
        let mut grants = self.grants.lock().await;
        if grants.len() >= self.capacity {
            if let Some(oldest) = grants.front().copied() {
                // sleep_until returns immediately for deadlines in the past
                tokio::time::sleep_until(oldest + self.window).await;
            }
            grants.pop_front();
        }
        grants.push_back(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_initial_burst_capped_at_capacity() {
        // capacity 3, 1 token/sec: window = 3s
        let limiter = RateLimiter::new(3, 1.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        // the fourth call must wait for the whole window
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_never_exceeds_capacity() {
        // capacity 4, 2 tokens/sec: window = 2s
        let capacity = 4usize;
        let limiter = RateLimiter::new(capacity as u32, 2.0);
        let window = Duration::from_secs(2);

        // include the initial burst; the bound must hold from grant 0
        let mut grants = Vec::new();
        for _ in 0..24 {
            limiter.acquire().await;
            grants.push(Instant::now());
        }

        // any capacity+1 consecutive grants must span at least the window,
        // which is equivalent to "no window holds more than capacity grants"
        for (i, pair) in grants.windows(capacity + 1).enumerate() {
            let span = pair[capacity].duration_since(pair[0]);
            assert!(
                span >= window,
                "grants {i}..{} within {span:?}, window is {window:?}",
                i + capacity
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_period_does_not_accumulate_extra_grants() {
        // capacity 2, 10 tokens/sec: window = 0.2s
        let limiter = RateLimiter::new(2, 10.0);
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(60)).await;

        // old grants have aged out, so a fresh burst of two is allowed
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        // but the third must still respect the window
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(199));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(1, 1.0));
        limiter.acquire().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..4u32 {
            let limiter = Arc::clone(&limiter);
            let tx = tx.clone();
            tokio::spawn(async move {
                limiter.acquire().await;
                tx.send(id).ok();
            });
            // let each waiter enqueue before spawning the next
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
