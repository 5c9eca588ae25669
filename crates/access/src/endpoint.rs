use crate::{AccessApi, AccessResult};
use governor::{
    clock::{DefaultClock, QuantaInstant},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::Mutex;
use std::{
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One upstream access node: its API client, its token bucket and its health
/// state.
pub struct Endpoint<A> {
    name: String,
    api: A,
    limiter: DirectLimiter,
    consecutive_failures: AtomicU32,
    quarantined_until: Mutex<Option<Instant>>,
}

impl<A> std::fmt::Debug for Endpoint<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl<A: AccessApi> Endpoint<A> {
    /// Consecutive transport failures before quarantine.
    pub const QUARANTINE_THRESHOLD: u32 = 3;

    /// Creates an endpoint with an `rps`-per-second, `burst`-deep token
    /// bucket.
    pub fn new(name: impl Into<String>, api: A, rps: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            name: name.into(),
            api,
            limiter: RateLimiter::direct(quota),
            consecutive_failures: AtomicU32::new(0),
            quarantined_until: Mutex::new(None),
        }
    }

    /// The `host:port` label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped API client.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Non-blocking token probe. `Ok` means a token was consumed; `Err`
    /// carries the earliest instant a token becomes available, used by the
    /// pool's soonest-token selection.
    pub fn try_acquire(&self) -> Result<(), QuantaInstant> {
        self.limiter.check().map_err(|not_until| not_until.earliest_possible())
    }

    /// Waits for a token.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Returns `true` while the endpoint is out of rotation.
    pub fn is_quarantined(&self) -> bool {
        let mut quarantined_until = self.quarantined_until.lock();
        match *quarantined_until {
            Some(until) if until > Instant::now() => true,
            Some(_) => {
                *quarantined_until = None;
                false
            }
            None => false,
        }
    }

    /// Clears the failure streak after a successful call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Counts a transport failure; at the threshold the endpoint is
    /// quarantined for `quarantine`. Returns `true` when quarantine was just
    /// entered.
    pub fn record_transport_failure(&self, quarantine: Duration) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= Self::QUARANTINE_THRESHOLD {
            *self.quarantined_until.lock() = Some(Instant::now() + quarantine);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            warn!(target: "access", endpoint = %self.name, ?quarantine, "endpoint quarantined");
            return true;
        }
        false
    }

    /// Health probe: one rate-limited `latest_sealed_height` call. On
    /// success the endpoint returns to rotation.
    pub async fn probe(&self) -> AccessResult<u64> {
        self.acquire().await;
        match self.api.latest_sealed_height().await {
            Ok(height) => {
                self.record_success();
                *self.quarantined_until.lock() = None;
                debug!(target: "access", endpoint = %self.name, height, "probe succeeded");
                Ok(height)
            }
            Err(err) => {
                debug!(target: "access", endpoint = %self.name, %err, "probe failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAccessApi, MockChain};
    use std::time::Instant;

    fn endpoint(rps: u32, burst: u32) -> Endpoint<MockAccessApi> {
        Endpoint::new("node:9000", MockAccessApi::new(MockChain::with_blocks(0, 5)), rps, burst)
    }

    #[tokio::test]
    async fn bucket_grants_at_most_burst_immediately() {
        let endpoint = endpoint(1, 5);
        let mut granted = 0;
        while endpoint.try_acquire().is_ok() {
            granted += 1;
            assert!(granted <= 5, "bucket exceeded its burst");
        }
        assert_eq!(granted, 5);
    }

    #[tokio::test]
    async fn bucket_refills_at_the_configured_rate() {
        let endpoint = endpoint(20, 1);
        let start = Instant::now();
        for _ in 0..5 {
            endpoint.acquire().await;
        }
        // 5 tokens at 20/s with burst 1: four refills of 50 ms each.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn quarantine_enters_after_three_transport_failures() {
        let endpoint = endpoint(100, 100);
        assert!(!endpoint.record_transport_failure(Duration::from_secs(30)));
        assert!(!endpoint.record_transport_failure(Duration::from_secs(30)));
        assert!(endpoint.record_transport_failure(Duration::from_secs(30)));
        assert!(endpoint.is_quarantined());
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let endpoint = endpoint(100, 100);
        endpoint.record_transport_failure(Duration::from_secs(30));
        endpoint.record_transport_failure(Duration::from_secs(30));
        endpoint.record_success();
        assert!(!endpoint.record_transport_failure(Duration::from_secs(30)));
        assert!(!endpoint.is_quarantined());
    }

    #[tokio::test]
    async fn probe_restores_a_quarantined_endpoint() {
        let endpoint = endpoint(100, 100);
        for _ in 0..3 {
            endpoint.record_transport_failure(Duration::from_secs(300));
        }
        assert!(endpoint.is_quarantined());
        endpoint.probe().await.unwrap();
        assert!(!endpoint.is_quarantined());
    }
}
