use crate::gather::{DEFAULT_FETCH_CONCURRENCY, gather_subscriptions};
use crate::persist::{BatchSettings, OutputSettings, PersistError, RunWriter, plan_batches};
use crate::rank::{DEFAULT_MAX_RETAINED, rank};
use crate::report::{CheckOutcome, CheckReport};
use crate::sources::{SourceError, load_subscription_urls};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use nodesieve_scanner::prober::{DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_DELAY};
use nodesieve_scanner::{
    Connector, Fetcher, KeyScope, ProbeProgress, Prober, TcpConnector, deduplicate,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub concurrency: usize,
    pub connect_timeout: Duration,
    /// Connections slower than this are treated as unreachable
    pub max_delay: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Options for configuring a check run
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub fetch_concurrency: usize,
    pub key_scope: KeyScope,
    pub probe: ProbeSettings,
    pub max_retained: usize,
    pub batches: BatchSettings,
    pub output: OutputSettings,
    pub show_progress_bars: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            key_scope: KeyScope::default(),
            probe: ProbeSettings::default(),
            max_retained: DEFAULT_MAX_RETAINED,
            batches: BatchSettings::default(),
            output: OutputSettings::default(),
            show_progress_bars: false,
        }
    }
}

impl CheckOptions {
    pub fn validate(&self) -> Result<(), CheckError> {
        let invalid = |msg: &str| Err(CheckError::InvalidOptions(msg.to_string()));

        if self.probe.concurrency == 0 {
            return invalid("probe concurrency must be at least 1");
        }
        if self.fetch_concurrency == 0 {
            return invalid("fetch concurrency must be at least 1");
        }
        if self.probe.connect_timeout.is_zero() {
            return invalid("connect timeout must be greater than zero");
        }
        if self.batches.batch_size == 0 {
            return invalid("batch size must be at least 1");
        }
        if self.batches.min_batch_size > self.batches.batch_size {
            return Err(CheckError::InvalidOptions(format!(
                "minimum batch size {} exceeds batch size {}",
                self.batches.min_batch_size, self.batches.batch_size
            )));
        }
        Ok(())
    }
}

/// Callback for reporting stage progress
pub type CheckProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Runs the whole pipeline: gather, deduplicate, probe, rank, persist
pub struct Checker {
    options: CheckOptions,
    fetcher: Arc<dyn Fetcher>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    progress_callback: Option<CheckProgressCallback>,
}

impl Checker {
    pub fn new(options: CheckOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            options,
            fetcher,
            connector: Arc::new(TcpConnector),
            cancel: CancellationToken::new(),
            progress_callback: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_callback(mut self, callback: CheckProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn report_progress(&self, message: String) {
        if let Some(ref callback) = self.progress_callback {
            callback(message);
        }
    }

    /// Load the subscription list at `path` and run against it
    pub async fn run_list(&self, path: &Path) -> Result<CheckReport, CheckError> {
        let urls = load_subscription_urls(path)?;
        self.run(&urls).await
    }

    /// Execute a check over `urls` and describe what happened.
    ///
    /// Failed fetches, invalid nodes and unreachable nodes are counted in
    /// the report, and a list with no active URLs ends as "no usable
    /// nodes". Only bad options and output errors fail the run. On
    /// cancellation whatever was probed so far is still ranked and written.
    pub async fn run(&self, urls: &[String]) -> Result<CheckReport, CheckError> {
        self.options.validate()?;

        let started = Local::now();
        let mut report = CheckReport::empty(urls.len());
        if urls.is_empty() {
            self.report_progress("No active subscriptions".to_string());
            return Ok(report);
        }

        self.report_progress(format!("Fetching {} subscriptions", urls.len()));
        let gathered = gather_subscriptions(
            urls,
            self.fetcher.as_ref(),
            self.options.fetch_concurrency,
            &self.cancel,
        )
        .await;

        report.subscriptions_fetched = gathered.fetched.len();
        report.failed_subscriptions = gathered.failed.clone();
        if gathered.cancelled {
            report.cancelled = true;
            report.outcome = CheckOutcome::Cancelled;
            return Ok(report);
        }

        let candidates: Vec<_> = gathered.candidates().collect();
        report.candidates = candidates.len();

        let deduplicated = deduplicate(candidates, self.options.key_scope);
        report.unique_nodes = deduplicated.targets.len();
        report.invalid_nodes = deduplicated.invalid;
        report.duplicate_nodes = deduplicated.duplicates;
        info!(
            "{} candidates, {} unique, {} duplicates, {} invalid",
            report.candidates, report.unique_nodes, report.duplicate_nodes, report.invalid_nodes
        );

        if deduplicated.targets.is_empty() {
            self.report_progress("No usable nodes found".to_string());
            return Ok(report);
        }

        self.report_progress(format!("Probing {} nodes", report.unique_nodes));
        let progress_bar = self.progress_bar(deduplicated.targets.len());
        let mut prober = Prober::new()
            .with_concurrency(self.options.probe.concurrency)
            .with_connect_timeout(self.options.probe.connect_timeout)
            .with_max_delay(self.options.probe.max_delay)
            .with_connector(self.connector.clone())
            .with_cancellation_token(self.cancel.clone());
        if let Some(ref pb) = progress_bar {
            let pb = pb.clone();
            prober = prober.with_progress_callback(Arc::new(move |p: ProbeProgress| {
                pb.set_position(p.completed as u64);
                pb.set_message(format!("{} reachable", p.reachable));
            }));
        }

        let outcome = prober.probe_all(deduplicated.targets).await;
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        report.cancelled = outcome.cancelled;
        report.probed = outcome.results.len();
        report.reachable = outcome.reachable_count();

        let ranked = rank(outcome.results, self.options.max_retained);
        report.retained = ranked.len();
        if ranked.is_empty() {
            report.outcome = if report.cancelled {
                CheckOutcome::Cancelled
            } else {
                CheckOutcome::NoUsableNodes
            };
            self.report_progress("No reachable nodes".to_string());
            return Ok(report);
        }

        let plan = plan_batches(&ranked, self.options.batches);
        report.skipped_batches = plan.skipped.clone();

        let writer = RunWriter::new(self.options.output.clone());
        match writer.write(&plan, started)? {
            Some(run) => {
                self.report_progress(format!(
                    "Wrote {} batches to {}",
                    run.artifacts.len(),
                    run.directory.display()
                ));
                report.batches = run.artifacts;
                report.run_directory = Some(run.directory);
                report.pruned_runs = run.pruned;
                report.outcome = CheckOutcome::Written;
            }
            None => {
                report.outcome = if report.cancelled {
                    CheckOutcome::Cancelled
                } else {
                    CheckOutcome::NoBatchMetMinimum
                };
            }
        }

        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.options.show_progress_bars {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} probed, {msg} ({eta})")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        Some(pb)
    }
}
