use crate::descriptor::Endpoint;
use crate::result::{ProbeResult, ProbeTarget};
use async_trait::async_trait;
use futures::FutureExt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 32;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Snapshot delivered after every completed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeProgress {
    pub completed: usize,
    pub reachable: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(ProbeProgress) + Send + Sync>;

/// Establishes (and immediately drops) a connection to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<()>;
}

/// Plain TCP connect, including name resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<()> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        drop(stream);
        Ok(())
    }
}

/// Results of a probing run, in completion order
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub results: Vec<ProbeResult>,
    /// Set when the run was cancelled before every target completed
    pub cancelled: bool,
}

impl ProbeOutcome {
    pub fn reachable_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_reachable()).count()
    }
}

pub struct Prober {
    connector: Arc<dyn Connector>,
    concurrency: usize,
    connect_timeout: Duration,
    max_delay: Duration,
    progress_callback: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(TcpConnector),
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_delay: DEFAULT_MAX_DELAY,
            progress_callback: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Maximum number of probes in flight at once, clamped to
    /// `1..=Semaphore::MAX_PERMITS`
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connections slower than this count as unreachable
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Probe every target, at most `concurrency` at a time.
    ///
    /// Admission is FIFO in target order. Each spawned probe owns its
    /// semaphore permit, so the permit is returned however the task ends,
    /// abort included. Results are gathered by this loop alone.
    pub async fn probe_all(&self, targets: Vec<ProbeTarget>) -> ProbeOutcome {
        let total = targets.len();
        info!(
            "Probing {} nodes with {} concurrent connections",
            total, self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending = targets.into_iter();
        let mut next = pending.next();
        let mut tasks: JoinSet<ProbeResult> = JoinSet::new();
        let mut outcome = ProbeOutcome {
            results: Vec::with_capacity(total),
            cancelled: false,
        };
        let mut reachable = 0;

        while next.is_some() || !tasks.is_empty() {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }

                joined = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok(result)) => {
                            if result.is_reachable() {
                                reachable += 1;
                            }
                            outcome.results.push(result);
                            if let Some(ref callback) = self.progress_callback {
                                callback(ProbeProgress {
                                    completed: outcome.results.len(),
                                    reachable,
                                    total,
                                });
                            }
                        }
                        Some(Err(e)) => warn!("Probe task failed: {}", e),
                        None => {}
                    }
                }

                permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    if let Some(target) = next.take() {
                        let connector = self.connector.clone();
                        let connect_timeout = self.connect_timeout;
                        let max_delay = self.max_delay;
                        tasks.spawn(async move {
                            let _permit = permit;
                            let fallback = target.clone();
                            let probe = Self::probe_one(
                                connector.as_ref(),
                                target,
                                connect_timeout,
                                max_delay,
                            );
                            // A panicking connector still yields a result for its target
                            AssertUnwindSafe(probe).catch_unwind().await.unwrap_or_else(|_| {
                                warn!("Probe of {} panicked", fallback.endpoint);
                                ProbeResult::unreachable(fallback)
                            })
                        });
                    }
                    next = pending.next();
                }
            }
        }

        if outcome.cancelled {
            let abandoned = tasks.len();
            tasks.abort_all();
            warn!(
                "Probing cancelled: {} completed, {} in flight abandoned",
                outcome.results.len(),
                abandoned
            );
        } else {
            info!(
                "Probing complete. {} of {} nodes reachable",
                reachable, total
            );
        }

        outcome
    }

    /// A single bounded connect attempt. Never fails: every problem
    /// becomes an unreachable result.
    async fn probe_one(
        connector: &dyn Connector,
        target: ProbeTarget,
        connect_timeout: Duration,
        max_delay: Duration,
    ) -> ProbeResult {
        let start = Instant::now();
        match timeout(connect_timeout, connector.connect(&target.endpoint)).await {
            Ok(Ok(())) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                if latency_ms > max_delay.as_millis() as u64 {
                    debug!(
                        "{} connected in {}ms, over the {}ms limit",
                        target.endpoint,
                        latency_ms,
                        max_delay.as_millis()
                    );
                    ProbeResult::unreachable(target)
                } else {
                    debug!("{} connected in {}ms", target.endpoint, latency_ms);
                    ProbeResult::reachable(target, latency_ms)
                }
            }
            Ok(Err(e)) => {
                debug!("{} unreachable: {}", target.endpoint, e);
                ProbeResult::unreachable(target)
            }
            Err(_) => {
                debug!(
                    "{} timed out after {}ms",
                    target.endpoint,
                    connect_timeout.as_millis()
                );
                ProbeResult::unreachable(target)
            }
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NodeDescriptor;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn target(host: &str, port: u16, ordinal: usize) -> ProbeTarget {
        let line = format!("ss://{}:{}", host, port);
        let descriptor = NodeDescriptor::parse(&line).unwrap();
        let endpoint = descriptor.endpoint().unwrap();
        ProbeTarget {
            descriptor,
            endpoint,
            ordinal,
        }
    }

    fn targets(count: usize) -> Vec<ProbeTarget> {
        (0..count)
            .map(|i| target(&format!("node{}", i), 1000 + i as u16, i))
            .collect()
    }

    /// Sleeps for a per-host delay, or forever for unlisted hosts, and
    /// tracks how many connects are pending at once
    struct ScriptedConnector {
        delays: HashMap<String, Duration>,
        refuse: Vec<String>,
        panic_on: Vec<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(delays: HashMap<String, Duration>) -> Self {
            Self {
                delays,
                refuse: Vec::new(),
                panic_on: Vec::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn uniform(count: usize, delay: Duration) -> Self {
            Self::new(
                (0..count)
                    .map(|i| (format!("node{}", i), delay))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, endpoint: &Endpoint) -> io::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.panic_on.contains(&endpoint.host) {
                panic!("connector bug for {}", endpoint.host);
            }

            let result = if self.refuse.contains(&endpoint.host) {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            } else if let Some(delay) = self.delays.get(&endpoint.host) {
                tokio::time::sleep(*delay).await;
                Ok(())
            } else {
                std::future::pending::<()>().await;
                Ok(())
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_respected() {
        let connector = Arc::new(ScriptedConnector::uniform(100, Duration::from_millis(20)));
        let prober = Prober::new()
            .with_concurrency(8)
            .with_connector(connector.clone());

        let outcome = prober.probe_all(targets(100)).await;

        assert_eq!(outcome.results.len(), 100);
        assert!(!outcome.cancelled);
        let peak = connector.peak.load(Ordering::SeqCst);
        assert!(peak <= 8, "peak in-flight {} exceeded cap", peak);
        assert_eq!(peak, 8, "cap should be reached with 100 pending probes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_measured() {
        let mut delays = HashMap::new();
        delays.insert("node0".to_string(), Duration::from_millis(120));
        delays.insert("node1".to_string(), Duration::from_millis(45));
        let prober = Prober::new().with_connector(Arc::new(ScriptedConnector::new(delays)));

        let outcome = prober.probe_all(targets(2)).await;

        let by_host: HashMap<String, Option<u64>> = outcome
            .results
            .iter()
            .map(|r| (r.target.endpoint.host.clone(), r.latency_ms))
            .collect();
        assert_eq!(by_host["node0"], Some(120));
        assert_eq!(by_host["node1"], Some(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_without_blocking_others() {
        let mut delays = HashMap::new();
        delays.insert("node1".to_string(), Duration::from_millis(10));
        // node0 is unlisted and never completes
        let prober = Prober::new()
            .with_concurrency(2)
            .with_connect_timeout(Duration::from_millis(300))
            .with_connector(Arc::new(ScriptedConnector::new(delays)));

        let outcome = prober.probe_all(targets(2)).await;

        assert_eq!(outcome.results.len(), 2);
        // node1 finishes first even though node0 was admitted first
        assert_eq!(outcome.results[0].target.endpoint.host, "node1");
        assert_eq!(outcome.results[0].latency_ms, Some(10));
        assert_eq!(outcome.results[1].target.endpoint.host, "node0");
        assert_eq!(outcome.results[1].latency_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connection_is_reclassified_unreachable() {
        let mut delays = HashMap::new();
        delays.insert("node0".to_string(), Duration::from_millis(5001));
        delays.insert("node1".to_string(), Duration::from_millis(5000));
        let prober = Prober::new()
            .with_connect_timeout(Duration::from_secs(10))
            .with_max_delay(Duration::from_millis(5000))
            .with_connector(Arc::new(ScriptedConnector::new(delays)));

        let outcome = prober.probe_all(targets(2)).await;

        for result in &outcome.results {
            match result.target.endpoint.host.as_str() {
                "node0" => assert_eq!(result.latency_ms, None),
                "node1" => assert_eq!(result.latency_ms, Some(5000)),
                other => panic!("unexpected host {}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_is_unreachable() {
        let mut connector = ScriptedConnector::uniform(3, Duration::from_millis(5));
        connector.refuse.push("node1".to_string());
        let prober = Prober::new().with_connector(Arc::new(connector));

        let outcome = prober.probe_all(targets(3)).await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.reachable_count(), 2);
        let refused = outcome
            .results
            .iter()
            .find(|r| r.target.endpoint.host == "node1")
            .unwrap();
        assert!(!refused.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let seen: Arc<StdMutex<Vec<ProbeProgress>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let prober = Prober::new()
            .with_concurrency(4)
            .with_connector(Arc::new(ScriptedConnector::uniform(
                20,
                Duration::from_millis(7),
            )))
            .with_progress_callback(Arc::new(move |progress| {
                seen_clone.lock().unwrap().push(progress);
            }));

        prober.probe_all(targets(20)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 20);
        for pair in seen.windows(2) {
            assert!(pair[1].completed > pair[0].completed);
            assert!(pair[1].reachable >= pair[0].reachable);
        }
        assert_eq!(seen.last().unwrap().completed, 20);
        assert!(seen.iter().all(|p| p.total == 20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_partial_results() {
        let mut delays = HashMap::new();
        delays.insert("node0".to_string(), Duration::from_millis(10));
        // the remaining nodes hang until the timeout, which is far away
        let cancel = CancellationToken::new();
        let prober = Prober::new()
            .with_concurrency(2)
            .with_connect_timeout(Duration::from_secs(3600))
            .with_connector(Arc::new(ScriptedConnector::new(delays)))
            .with_cancellation_token(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = prober.probe_all(targets(10)).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].latency_ms, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_connect_still_yields_result() {
        let mut connector = ScriptedConnector::uniform(4, Duration::from_millis(5));
        connector.panic_on.push("node2".to_string());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let prober = Prober::new()
            .with_connector(Arc::new(connector))
            .with_progress_callback(Arc::new(move |progress| {
                seen_clone.store(progress.completed, Ordering::SeqCst);
            }));

        let outcome = prober.probe_all(targets(4)).await;

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.reachable_count(), 3);
        let failed = outcome
            .results
            .iter()
            .find(|r| r.target.endpoint.host == "node2")
            .unwrap();
        assert_eq!(failed.latency_ms, None);
        assert_eq!(failed.target.ordinal, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_concurrency_is_clamped() {
        let prober = Prober::new()
            .with_concurrency(usize::MAX)
            .with_connector(Arc::new(ScriptedConnector::uniform(3, Duration::from_millis(5))));

        let outcome = prober.probe_all(targets(3)).await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.reachable_count(), 3);
    }

    #[test]
    fn test_zero_concurrency_becomes_one() {
        assert_eq!(Prober::new().with_concurrency(0).concurrency, 1);
        assert_eq!(
            Prober::new().with_concurrency(usize::MAX).concurrency,
            Semaphore::MAX_PERMITS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input() {
        let outcome = Prober::new().probe_all(Vec::new()).await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_tcp_connector_against_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        // Bind then release a port so nothing is listening on it
        let closed_port = {
            let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
            closed.local_addr().unwrap().port()
        };

        let prober = Prober::new().with_connect_timeout(Duration::from_secs(2));
        let outcome = prober
            .probe_all(vec![
                target("127.0.0.1", open_port, 0),
                target("127.0.0.1", closed_port, 1),
            ])
            .await;

        assert_eq!(outcome.results.len(), 2);
        for result in &outcome.results {
            if result.target.endpoint.port == open_port {
                assert!(result.is_reachable(), "listener should be reachable");
            } else {
                assert!(!result.is_reachable(), "closed port should be unreachable");
            }
        }
    }
}
