use crate::{AccessApi, AccessError, AccessResult, Endpoint};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use flowidx_config::AccessConfig;
use flowidx_primitives::{BlockBundle, Event, HeightRange, TransactionBundle, B256};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A spork-pinned historic node set covering an inclusive height range.
struct Spork<A> {
    name: String,
    start: u64,
    end: u64,
    endpoints: Vec<Arc<Endpoint<A>>>,
}

impl<A> std::fmt::Debug for Spork<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spork")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// A fleet of upstream access nodes behind one [`AccessApi`].
///
/// Tip-adjacent calls go to the live set; calls pinned to a height below the
/// live root are routed to the spork covering that height. Transient
/// failures are retried on alternate endpoints with jittered exponential
/// backoff; repeated transport failures quarantine an endpoint until a
/// background probe brings it back.
#[derive(Debug)]
pub struct AccessPool<A> {
    live: Vec<Arc<Endpoint<A>>>,
    sporks: Vec<Spork<A>>,
    all: Vec<Arc<Endpoint<A>>>,
    live_root_height: u64,
    retries: u32,
    request_timeout: Duration,
    quarantine: Duration,
    cursor: AtomicUsize,
}

enum Selected<'a, A> {
    /// A token was already consumed; call immediately.
    Ready(&'a Arc<Endpoint<A>>),
    /// All buckets are empty; wait on the one refilling soonest.
    Wait(&'a Arc<Endpoint<A>>),
}

impl<A: AccessApi> AccessPool<A> {
    /// Backoff floor for cross-endpoint retries.
    const BACKOFF_MIN: Duration = Duration::from_millis(250);
    /// Backoff ceiling.
    const BACKOFF_MAX: Duration = Duration::from_secs(5);
    /// Probe cadence for quarantined endpoints.
    const PROBE_INTERVAL: Duration = Duration::from_secs(10);

    /// Builds the pool from configuration, creating one API client per
    /// `host:port` through `factory`. The archive node, when configured, is
    /// appended to every spork's endpoint set as a safety net.
    pub fn from_config(config: &AccessConfig, factory: impl Fn(&str) -> A) -> Self {
        let live_count = config.access_nodes.len();
        let rps = config.effective_rps(live_count);
        let burst = config.effective_burst(live_count);
        let live: Vec<Arc<Endpoint<A>>> = config
            .access_nodes
            .iter()
            .map(|node| Arc::new(Endpoint::new(node.clone(), factory(node), rps, burst)))
            .collect();

        let archive = config
            .archive_node
            .as_ref()
            .map(|node| Arc::new(Endpoint::new(node.clone(), factory(node), rps, burst)));

        let sporks: Vec<Spork<A>> = config
            .sporks
            .iter()
            .map(|spork| {
                let count = spork.nodes.len();
                let rps = config.effective_rps(count);
                let burst = config.effective_burst(count);
                let mut endpoints: Vec<Arc<Endpoint<A>>> = spork
                    .nodes
                    .iter()
                    .map(|node| Arc::new(Endpoint::new(node.clone(), factory(node), rps, burst)))
                    .collect();
                if let Some(archive) = &archive {
                    endpoints.push(archive.clone());
                }
                Spork {
                    name: spork.name.clone(),
                    start: spork.start,
                    end: spork.end,
                    endpoints,
                }
            })
            .collect();

        let mut all = live.clone();
        for spork in &sporks {
            all.extend(spork.endpoints.iter().cloned());
        }

        Self {
            live,
            sporks,
            all,
            live_root_height: config.live_root_height,
            retries: config.retries,
            request_timeout: config.request_timeout,
            quarantine: config.quarantine,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The endpoint set eligible for a call, by requested height.
    fn eligible(&self, height: Option<u64>) -> AccessResult<&[Arc<Endpoint<A>>]> {
        let height = match height {
            Some(height) if height < self.live_root_height => height,
            _ => return Ok(&self.live),
        };
        // Explicitly historic: a covering spork is required, silently
        // falling back to live would serve pruned data.
        self.sporks
            .iter()
            .find(|spork| height >= spork.start && height <= spork.end)
            .map(|spork| spork.endpoints.as_slice())
            .ok_or(AccessError::HistoryUnavailable { height })
    }

    /// Picks the endpoint with the soonest available token among the
    /// healthy members of `set`, round-robin on ties.
    fn select<'a>(&self, set: &'a [Arc<Endpoint<A>>]) -> AccessResult<Selected<'a, A>> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let healthy: Vec<&Arc<Endpoint<A>>> = (0..set.len())
            .map(|i| &set[(start + i) % set.len()])
            .filter(|endpoint| !endpoint.is_quarantined())
            .collect();
        if healthy.is_empty() {
            return Err(AccessError::NoHealthyEndpoint);
        }
        let mut soonest: Option<(&Arc<Endpoint<A>>, governor::clock::QuantaInstant)> = None;
        for endpoint in healthy {
            match endpoint.try_acquire() {
                Ok(()) => return Ok(Selected::Ready(endpoint)),
                Err(available_at) => {
                    if soonest.map(|(_, at)| available_at < at).unwrap_or(true) {
                        soonest = Some((endpoint, available_at));
                    }
                }
            }
        }
        let (endpoint, _) = soonest.expect("healthy set is non-empty");
        Ok(Selected::Wait(endpoint))
    }

    /// One attempt: select, wait for a token within the deadline, invoke,
    /// and account health.
    async fn attempt<T, F>(&self, height: Option<u64>, op: &'static str, f: &F) -> AccessResult<T>
    where
        F: Fn(Arc<Endpoint<A>>) -> BoxFuture<'static, AccessResult<T>> + Send + Sync,
    {
        let set = self.eligible(height)?;
        let endpoint = match self.select(set)? {
            Selected::Ready(endpoint) => endpoint,
            Selected::Wait(endpoint) => {
                tokio::time::timeout(self.request_timeout, endpoint.acquire())
                    .await
                    .map_err(|_| AccessError::Deadline)?;
                endpoint
            }
        };
        metrics::counter!("flowidx_rpc_calls", "op" => op, "endpoint" => endpoint.name().to_owned())
            .increment(1);
        let result = tokio::time::timeout(self.request_timeout, f(endpoint.clone()))
            .await
            .unwrap_or(Err(AccessError::Deadline));
        match &result {
            Ok(_) => endpoint.record_success(),
            Err(err) if err.is_transport() => {
                endpoint.record_transport_failure(self.quarantine);
            }
            Err(_) => {}
        }
        result
    }

    /// Runs `f` with retries across alternate endpoints for transient
    /// failures.
    async fn call<T, F>(&self, height: Option<u64>, op: &'static str, f: F) -> AccessResult<T>
    where
        T: Send,
        F: Fn(Arc<Endpoint<A>>) -> BoxFuture<'static, AccessResult<T>> + Send + Sync,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Self::BACKOFF_MIN)
            .with_max_delay(Self::BACKOFF_MAX)
            .with_max_times(self.retries as usize)
            .with_jitter();
        (|| self.attempt(height, op, &f))
            .retry(&backoff)
            .when(AccessError::is_retryable)
            .notify(|err, delay| {
                debug!(target: "access", op, %err, ?delay, "retrying on alternate endpoint");
            })
            .await
    }

    /// Spawns the background probe that returns quarantined endpoints to
    /// rotation.
    pub fn spawn_health_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::PROBE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                for endpoint in &pool.all {
                    if endpoint.is_quarantined() {
                        let _ = endpoint.probe().await;
                    }
                }
            }
            trace!(target: "access", "health task stopped");
        })
    }

    /// Endpoint count across live and historic sets.
    pub fn endpoint_count(&self) -> usize {
        self.all.len()
    }
}

#[async_trait]
impl<A: AccessApi> AccessApi for AccessPool<A> {
    async fn latest_sealed_height(&self) -> AccessResult<u64> {
        self.call(None, "latest_sealed_height", |endpoint| {
            async move { endpoint.api().latest_sealed_height().await }.boxed()
        })
        .await
    }

    async fn block_bundle_at(&self, height: u64) -> AccessResult<BlockBundle> {
        self.call(Some(height), "block_bundle_at", move |endpoint| {
            async move { endpoint.api().block_bundle_at(height).await }.boxed()
        })
        .await
    }

    async fn transaction(&self, id: B256) -> AccessResult<TransactionBundle> {
        self.call(None, "transaction", move |endpoint| {
            async move { endpoint.api().transaction(id).await }.boxed()
        })
        .await
    }

    async fn collection(&self, id: B256) -> AccessResult<Vec<B256>> {
        self.call(None, "collection", move |endpoint| {
            async move { endpoint.api().collection(id).await }.boxed()
        })
        .await
    }

    async fn events_in_range(
        &self,
        event_type: Option<&str>,
        range: HeightRange,
    ) -> AccessResult<Vec<Event>> {
        let event_type = event_type.map(str::to_owned);
        self.call(Some(range.start), "events_in_range", move |endpoint| {
            let event_type = event_type.clone();
            async move { endpoint.api().events_in_range(event_type.as_deref(), range).await }
                .boxed()
        })
        .await
    }

    async fn execute_script(
        &self,
        script: &str,
        arguments: &[serde_json::Value],
        height: Option<u64>,
    ) -> AccessResult<serde_json::Value> {
        let script = script.to_owned();
        let arguments = arguments.to_vec();
        self.call(height, "execute_script", move |endpoint| {
            let script = script.clone();
            let arguments = arguments.clone();
            async move { endpoint.api().execute_script(&script, &arguments, height).await }.boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAccessApi, MockChain};
    use assert_matches::assert_matches;
    use flowidx_config::SporkConfig;

    fn pool_config(nodes: usize) -> AccessConfig {
        AccessConfig {
            access_nodes: (0..nodes).map(|i| format!("node{i}:9000")).collect(),
            rps_per_node: Some(1_000),
            burst_per_node: Some(1_000),
            retries: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn routes_tip_calls_to_live_nodes() {
        let chain = MockChain::with_blocks(0, 10);
        let config = pool_config(2);
        let pool = AccessPool::from_config(&config, |_| MockAccessApi::new(chain.clone()));
        assert_eq!(pool.latest_sealed_height().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn historic_height_without_spork_fails() {
        let chain = MockChain::with_blocks(0, 10);
        let mut config = pool_config(1);
        config.live_root_height = 1_000;
        config.sporks = vec![SporkConfig {
            name: "spork-5".to_owned(),
            start: 500,
            end: 999,
            nodes: vec!["historic0:9000".to_owned()],
        }];
        let pool = AccessPool::from_config(&config, |_| MockAccessApi::new(chain.clone()));
        // Height 100 is below the live root and below every spork.
        assert_matches!(
            pool.block_bundle_at(100).await,
            Err(AccessError::HistoryUnavailable { height: 100 })
        );
    }

    #[tokio::test]
    async fn historic_height_routes_to_spork_nodes() {
        let live_chain = MockChain::with_blocks(1_000, 1_010);
        let historic_chain = MockChain::with_blocks(0, 999);
        let mut config = pool_config(1);
        config.live_root_height = 1_000;
        config.sporks = vec![SporkConfig {
            name: "spork-1".to_owned(),
            start: 0,
            end: 999,
            nodes: vec!["historic0:9000".to_owned()],
        }];
        let pool = AccessPool::from_config(&config, |node| {
            if node.starts_with("historic") {
                MockAccessApi::new(historic_chain.clone())
            } else {
                MockAccessApi::new(live_chain.clone())
            }
        });
        let bundle = pool.block_bundle_at(42).await.unwrap();
        assert_eq!(bundle.block.height, 42);
        let bundle = pool.block_bundle_at(1_005).await.unwrap();
        assert_eq!(bundle.block.height, 1_005);
    }

    #[tokio::test]
    async fn transient_failures_retry_on_alternate_endpoints() {
        let chain = MockChain::with_blocks(0, 10);
        chain.fail_next_transport("node0:9000", 1);
        let config = pool_config(2);
        let pool = AccessPool::from_config(&config, |node| {
            MockAccessApi::named(chain.clone(), node)
        });
        // One endpoint fails once; the retry lands on the other.
        assert_eq!(pool.latest_sealed_height().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn repeated_transport_failures_quarantine_the_endpoint() {
        let chain = MockChain::with_blocks(0, 10);
        chain.fail_next_transport("node0:9000", 100);
        let config = pool_config(2);
        let pool = AccessPool::from_config(&config, |node| {
            MockAccessApi::named(chain.clone(), node)
        });
        for _ in 0..10 {
            let _ = pool.latest_sealed_height().await;
        }
        // node0 keeps failing and drops out of rotation; the pool still
        // serves from node1.
        assert_eq!(pool.latest_sealed_height().await.unwrap(), 10);
        assert!(chain.calls_for("node1:9000") > 0);
    }
}
