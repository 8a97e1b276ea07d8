use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Time source for the rate limiter and retry backoff.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly and records the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.state().elapsed += duration;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.state().sleeps.iter().sum()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Process-wide request cadence: at most one request per `min_interval`.
///
/// Callers are serialized on an internal mutex, so bursts from several threads
/// queue up instead of hitting the remote service in parallel.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            clock,
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Block until a request may be issued, then claim the slot.
    pub fn acquire(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(prev) = *last {
            let elapsed = self.clock.now().saturating_duration_since(prev);
            if elapsed < self.min_interval {
                self.clock.sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(self.clock.now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(interval_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(clock.clone(), Duration::from_millis(interval_ms));
        (clock, limiter)
    }

    #[test]
    fn test_first_acquire_does_not_wait() {
        let (clock, limiter) = limiter(1000);
        limiter.acquire();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_back_to_back_requests_are_spaced() {
        let (clock, limiter) = limiter(1000);
        limiter.acquire();
        limiter.acquire();
        limiter.acquire();
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn test_only_remaining_interval_is_waited() {
        let (clock, limiter) = limiter(1000);
        limiter.acquire();
        clock.advance(Duration::from_millis(700));
        limiter.acquire();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(300)]);
    }

    #[test]
    fn test_no_wait_after_interval_elapsed() {
        let (clock, limiter) = limiter(1000);
        limiter.acquire();
        clock.advance(Duration::from_secs(5));
        limiter.acquire();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_shared_limiter_serializes_threads() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone(), Duration::from_millis(500)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.acquire())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Four requests, three enforced gaps, regardless of which thread went first.
        assert_eq!(clock.total_slept(), Duration::from_millis(1500));
    }
}
