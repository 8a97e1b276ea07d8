pub mod cache;
pub mod limiter;
pub mod nominatim;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::{Coordinate, Geocode, PhotoRecord};
use crate::error::Result;
use cache::GeocodeCache;
use limiter::RateLimiter;

/// Failure reported by a [`ReverseGeocode`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Network failure, timeout, throttling or server error. Worth retrying.
    #[error("transient geocoding failure: {0}")]
    Transient(String),
    /// The service answered with something that is not a geocoding response.
    #[error("malformed geocoding response: {0}")]
    Malformed(String),
    /// The service refused the request outright (e.g. HTTP 400 or 404). Not retried.
    #[error("geocoding request rejected: {0}")]
    Rejected(String),
}

/// A reverse geocoding service.
///
/// `Ok(None)` means the service answered but named no place.
pub trait ReverseGeocode: Send + Sync {
    fn reverse(&self, coordinate: Coordinate) -> std::result::Result<Option<String>, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    InvalidCoordinate,
    /// The service answered without a usable place.
    NoPlace,
    Malformed(String),
    Rejected(String),
    Exhausted { attempts: u32, last_error: String },
    /// Already failed earlier in this process; not asked again until a rebuild.
    PreviouslyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn into_geocode(self) -> Geocode {
        match self {
            Resolution::Resolved(place) => Geocode::Resolved(place),
            Resolution::Unresolved(_) => Geocode::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Snapshot of a [`Geocoder`]'s counters since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    pub cache_hits: usize,
    pub requests: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// Coordinate → place name with caching, rate limiting and retries.
pub struct Geocoder {
    backend: Box<dyn ReverseGeocode>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    cache: Mutex<GeocodeCache>,
    /// Held across the cache re-check and the network call, so each key is requested once.
    inflight: Mutex<()>,
    cache_hits: AtomicUsize,
    requests: AtomicUsize,
    resolved: AtomicUsize,
    unresolved: AtomicUsize,
}

impl Geocoder {
    pub fn new(
        backend: Box<dyn ReverseGeocode>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        cache: GeocodeCache,
    ) -> Self {
        Self {
            backend,
            limiter,
            policy,
            cache: Mutex::new(cache),
            inflight: Mutex::new(()),
            cache_hits: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            unresolved: AtomicUsize::new(0),
        }
    }

    pub fn resolve(&self, coordinate: Coordinate) -> Resolution {
        self.resolve_counted(coordinate).0
    }

    /// Resolve and report how many network requests this call made.
    pub(crate) fn resolve_counted(&self, coordinate: Coordinate) -> (Resolution, usize) {
        let (resolution, requests) = self.resolve_inner(coordinate);
        let counter = if resolution.is_resolved() {
            &self.resolved
        } else {
            &self.unresolved
        };
        counter.fetch_add(1, Ordering::Relaxed);
        (resolution, requests)
    }

    fn resolve_inner(&self, coordinate: Coordinate) -> (Resolution, usize) {
        if !coordinate.is_valid() {
            return (Resolution::Unresolved(UnresolvedReason::InvalidCoordinate), 0);
        }
        if let Some(known) = self.cached(coordinate) {
            return (known, 0);
        }

        let _inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have resolved the same key while we waited.
        if let Some(known) = self.cached(coordinate) {
            return (known, 0);
        }

        let (resolution, requests) = self.lookup(coordinate);
        let mut cache = self.cache();
        match &resolution {
            Resolution::Resolved(place) => cache.insert(coordinate, place),
            Resolution::Unresolved(_) => cache.mark_failed(coordinate),
        }
        (resolution, requests)
    }

    fn cached(&self, coordinate: Coordinate) -> Option<Resolution> {
        let cache = self.cache();
        if let Some(place) = cache.get(coordinate) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(Resolution::Resolved(place.to_string()));
        }
        cache
            .has_failed(coordinate)
            .then_some(Resolution::Unresolved(UnresolvedReason::PreviouslyFailed))
    }

    fn lookup(&self, coordinate: Coordinate) -> (Resolution, usize) {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.limiter.acquire();
            self.requests.fetch_add(1, Ordering::Relaxed);
            let made = attempt as usize;

            match self.backend.reverse(coordinate) {
                Ok(Some(place)) => {
                    tracing::debug!(%coordinate, place = %place, "resolved");
                    return (Resolution::Resolved(place), made);
                }
                Ok(None) => {
                    tracing::debug!(%coordinate, "no place at coordinate");
                    return (Resolution::Unresolved(UnresolvedReason::NoPlace), made);
                }
                Err(BackendError::Malformed(message)) => {
                    tracing::warn!(%coordinate, error = %message, "malformed geocoding response");
                    return (Resolution::Unresolved(UnresolvedReason::Malformed(message)), made);
                }
                Err(BackendError::Rejected(message)) => {
                    tracing::warn!(%coordinate, error = %message, "geocoding request rejected");
                    return (Resolution::Unresolved(UnresolvedReason::Rejected(message)), made);
                }
                Err(BackendError::Transient(message)) => {
                    tracing::warn!(%coordinate, attempt, error = %message, "geocoding attempt failed");
                    last_error = message;
                    if attempt < max_attempts {
                        self.limiter.clock().sleep(self.policy.backoff(attempt));
                    }
                }
            }
        }

        (
            Resolution::Unresolved(UnresolvedReason::Exhausted {
                attempts: max_attempts,
                last_error,
            }),
            max_attempts as usize,
        )
    }

    pub fn stats(&self) -> GeocodeStats {
        GeocodeStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
        }
    }

    /// Learn places from records resolved in earlier runs.
    pub fn seed(&self, records: &[PhotoRecord]) -> usize {
        self.cache().seed_from(records)
    }

    /// Allow previously failed keys to be requested again.
    pub fn forget_failures(&self) {
        self.cache().clear_failures();
    }

    pub fn cached_places(&self) -> usize {
        self.cache().len()
    }

    /// Persist the cache if it learned anything since the last save.
    pub fn save_cache(&self, path: &Path) -> Result<bool> {
        let mut cache = self.cache();
        if !cache.is_dirty() {
            return Ok(false);
        }
        cache.save(path)?;
        tracing::debug!(cache = %path.display(), places = cache.len(), "geocode cache saved");
        Ok(true)
    }

    fn cache(&self) -> MutexGuard<'_, GeocodeCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limiter::ManualClock;
    use std::collections::VecDeque;

    /// Replays scripted answers, then keeps answering with `fallback`.
    struct ScriptedBackend {
        script: Mutex<VecDeque<std::result::Result<Option<String>, BackendError>>>,
        fallback: std::result::Result<Option<String>, BackendError>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        fn answering(place: &str) -> (Self, Arc<AtomicUsize>) {
            Self::scripted(Vec::new(), Ok(Some(place.to_string())))
        }

        fn scripted(
            script: Vec<std::result::Result<Option<String>, BackendError>>,
            fallback: std::result::Result<Option<String>, BackendError>,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: calls.clone(),
            };
            (backend, calls)
        }
    }

    impl ReverseGeocode for ScriptedBackend {
        fn reverse(&self, _: Coordinate) -> std::result::Result<Option<String>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn geocoder(backend: ScriptedBackend) -> (Arc<ManualClock>, Geocoder) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone(), Duration::from_millis(1100)));
        let geocoder = Geocoder::new(
            Box::new(backend),
            limiter,
            RetryPolicy::default(),
            GeocodeCache::new(5),
        );
        (clock, geocoder)
    }

    fn transient() -> BackendError {
        BackendError::Transient("HTTP 503 Service Unavailable".into())
    }

    // ── RetryPolicy ─────────────────────────────────────────────

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    // ── resolve ─────────────────────────────────────────────────

    #[test]
    fn test_resolve_success() {
        let (backend, calls) = ScriptedBackend::answering("Lyon, France");
        let (_, geocoder) = geocoder(backend);

        let res = geocoder.resolve(Coordinate::new(45.764, 4.8357));
        assert_eq!(res, Resolution::Resolved("Lyon, France".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(geocoder.cached_places(), 1);
    }

    #[test]
    fn test_quantized_duplicates_make_one_call() {
        let (backend, calls) = ScriptedBackend::answering("Paris, France");
        let (clock, geocoder) = geocoder(backend);

        geocoder.resolve(Coordinate::new(48.858_371, 2.294_481));
        geocoder.resolve(Coordinate::new(48.858_368, 2.294_477));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty(), "cache hit must not wait on the limiter");
        let stats = geocoder.stats();
        assert_eq!((stats.requests, stats.cache_hits, stats.resolved), (1, 1, 2));
    }

    #[test]
    fn test_distinct_locations_are_rate_limited() {
        let (backend, calls) = ScriptedBackend::answering("Somewhere");
        let (clock, geocoder) = geocoder(backend);

        geocoder.resolve(Coordinate::new(10.0, 10.0));
        geocoder.resolve(Coordinate::new(20.0, 20.0));
        geocoder.resolve(Coordinate::new(30.0, 30.0));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(2200));
    }

    #[test]
    fn test_transient_errors_exhaust_retries() {
        let (backend, calls) = ScriptedBackend::scripted(Vec::new(), Err(transient()));
        let (clock, geocoder) = geocoder(backend);

        let res = geocoder.resolve(Coordinate::new(1.0, 1.0));
        match res {
            Resolution::Unresolved(UnresolvedReason::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Backoffs of 2s and 4s; they already exceed the limiter interval.
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(geocoder.stats().unresolved, 1);
    }

    #[test]
    fn test_transient_then_success() {
        let (backend, calls) =
            ScriptedBackend::scripted(vec![Err(transient())], Ok(Some("Rome, Italy".into())));
        let (_, geocoder) = geocoder(backend);

        let (res, requests) = geocoder.resolve_counted(Coordinate::new(41.9, 12.5));
        assert_eq!(res, Resolution::Resolved("Rome, Italy".into()));
        assert_eq!(requests, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_malformed_and_no_place_are_not_retried() {
        let (backend, calls) = ScriptedBackend::scripted(
            vec![Err(BackendError::Malformed("<html>".into()))],
            Ok(None),
        );
        let (_, geocoder) = geocoder(backend);

        assert!(matches!(
            geocoder.resolve(Coordinate::new(1.0, 1.0)),
            Resolution::Unresolved(UnresolvedReason::Malformed(_))
        ));
        assert_eq!(
            geocoder.resolve(Coordinate::new(2.0, 2.0)),
            Resolution::Unresolved(UnresolvedReason::NoPlace)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejected_request_is_not_retried() {
        let (backend, calls) = ScriptedBackend::scripted(
            vec![Err(BackendError::Rejected("HTTP 404 Not Found".into()))],
            Ok(Some("Never asked".into())),
        );
        let (clock, geocoder) = geocoder(backend);

        assert!(matches!(
            geocoder.resolve(Coordinate::new(1.0, 1.0)),
            Resolution::Unresolved(UnresolvedReason::Rejected(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().iter().all(|d| *d < Duration::from_secs(2)));
    }

    #[test]
    fn test_invalid_coordinate_makes_no_request() {
        let (backend, calls) = ScriptedBackend::answering("Nowhere");
        let (_, geocoder) = geocoder(backend);

        assert_eq!(
            geocoder.resolve(Coordinate::new(123.0, 0.0)),
            Resolution::Unresolved(UnresolvedReason::InvalidCoordinate)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_key_not_retried_until_forgotten() {
        let (backend, calls) = ScriptedBackend::scripted(vec![Ok(None)], Ok(Some("Found".into())));
        let (_, geocoder) = geocoder(backend);
        let spot = Coordinate::new(5.0, 5.0);

        geocoder.resolve(spot);
        assert_eq!(
            geocoder.resolve(spot),
            Resolution::Unresolved(UnresolvedReason::PreviouslyFailed)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        geocoder.forget_failures();
        assert_eq!(geocoder.resolve(spot), Resolution::Resolved("Found".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_request() {
        let (backend, calls) = ScriptedBackend::answering("Oslo, Norway");
        let (_, geocoder) = geocoder(backend);
        let geocoder = Arc::new(geocoder);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = geocoder.clone();
                std::thread::spawn(move || g.resolve(Coordinate::new(59.9139, 10.7522)))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Resolution::Resolved("Oslo, Norway".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_save_cache_only_when_dirty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("geocode.json");
        let (backend, _) = ScriptedBackend::answering("Bergen, Norway");
        let (_, geocoder) = geocoder(backend);

        assert!(!geocoder.save_cache(&path).unwrap());
        geocoder.resolve(Coordinate::new(60.39, 5.32));
        assert!(geocoder.save_cache(&path).unwrap());
        assert!(!geocoder.save_cache(&path).unwrap());
        assert_eq!(GeocodeCache::load(&path, 5).len(), 1);
    }
}
