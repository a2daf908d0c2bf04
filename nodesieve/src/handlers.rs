use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use nodesieve_core::persist::{BatchSettings, OutputSettings, decode_artifact};
use nodesieve_core::sources::mark_failed_subscriptions;
use nodesieve_core::{
    CheckOptions, CheckOutcome, CheckReport, Checker, ProbeSettings, ReportFormat,
    generate_check_report,
};
use nodesieve_scanner::{HttpFetcher, KeyScope};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

pub const EXIT_WRITTEN: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_NO_USABLE_NODES: i32 = 2;
pub const EXIT_NO_BATCH_MET_MINIMUM: i32 = 3;
pub const EXIT_CANCELLED: i32 = 130;

/// Settings of one `check` invocation, as given on the command line
#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub subs: PathBuf,
    pub output: PathBuf,
    pub threads: usize,
    pub timeout_secs: u64,
    pub max_delay_ms: u64,
    pub max_save: usize,
    pub batch_size: usize,
    pub min_batch: usize,
    pub keep_runs: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_threads: usize,
    pub dedup_by_address: bool,
    pub mark_failed: bool,
    pub format: ReportFormat,
    pub quiet: bool,
}

impl Default for CheckArgs {
    fn default() -> Self {
        Self {
            subs: PathBuf::from("source/subs.txt"),
            output: PathBuf::from("output"),
            threads: 32,
            timeout_secs: 3,
            max_delay_ms: 5000,
            max_save: 6666,
            batch_size: 666,
            min_batch: 99,
            keep_runs: 5,
            fetch_timeout_secs: 5,
            fetch_threads: 8,
            dedup_by_address: false,
            mark_failed: true,
            format: ReportFormat::Text,
            quiet: false,
        }
    }
}

impl CheckArgs {
    pub fn from_matches(args: &ArgMatches) -> Result<Self> {
        let defaults = Self::default();
        let format = args
            .get_one::<String>("format")
            .map(|f| ReportFormat::from_str(f).context(format!("unknown report format '{}'", f)))
            .transpose()?
            .unwrap_or(defaults.format);

        Ok(Self {
            subs: args
                .get_one::<String>("subs")
                .map(|p| expand_path(p))
                .unwrap_or(defaults.subs),
            output: args
                .get_one::<String>("output")
                .map(|p| expand_path(p))
                .unwrap_or(defaults.output),
            threads: *args.get_one::<usize>("threads").unwrap_or(&defaults.threads),
            timeout_secs: *args.get_one::<u64>("timeout").unwrap_or(&defaults.timeout_secs),
            max_delay_ms: *args
                .get_one::<u64>("max-delay")
                .unwrap_or(&defaults.max_delay_ms),
            max_save: *args.get_one::<usize>("max-save").unwrap_or(&defaults.max_save),
            batch_size: *args
                .get_one::<usize>("batch-size")
                .unwrap_or(&defaults.batch_size),
            min_batch: *args.get_one::<usize>("min-batch").unwrap_or(&defaults.min_batch),
            keep_runs: *args.get_one::<usize>("keep-runs").unwrap_or(&defaults.keep_runs),
            fetch_timeout_secs: *args
                .get_one::<u64>("fetch-timeout")
                .unwrap_or(&defaults.fetch_timeout_secs),
            fetch_threads: *args
                .get_one::<usize>("fetch-threads")
                .unwrap_or(&defaults.fetch_threads),
            dedup_by_address: args.get_flag("dedup-by-address"),
            mark_failed: !args.get_flag("no-mark-failed"),
            format,
            quiet: args.get_flag("quiet"),
        })
    }

    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            fetch_concurrency: self.fetch_threads,
            key_scope: if self.dedup_by_address {
                KeyScope::Address
            } else {
                KeyScope::SchemeQualified
            },
            probe: ProbeSettings {
                concurrency: self.threads,
                connect_timeout: Duration::from_secs(self.timeout_secs),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            max_retained: self.max_save,
            batches: BatchSettings {
                batch_size: self.batch_size,
                min_batch_size: self.min_batch,
            },
            output: OutputSettings {
                root: self.output.clone(),
                keep_runs: self.keep_runs,
            },
            show_progress_bars: !self.quiet,
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed (tests); keep it
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn outcome_exit_code(report: &CheckReport) -> i32 {
    if report.cancelled {
        return EXIT_CANCELLED;
    }
    match report.outcome {
        CheckOutcome::Written => EXIT_WRITTEN,
        CheckOutcome::NoUsableNodes => EXIT_NO_USABLE_NODES,
        CheckOutcome::NoBatchMetMinimum => EXIT_NO_BATCH_MET_MINIMUM,
        CheckOutcome::Cancelled => EXIT_CANCELLED,
    }
}

fn print_divider() {
    eprintln!("{}", "═".repeat(60).bright_blue().bold());
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken, quiet: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if !quiet {
                eprintln!(
                    "\n{} Interrupted, keeping what was probed so far",
                    "⚠".yellow().bold()
                );
            }
            token.cancel();
        }
    });
}

pub async fn handle_check(sub_matches: &ArgMatches) -> Result<i32> {
    let args = CheckArgs::from_matches(sub_matches)?;
    run_check(&args).await
}

pub async fn run_check(args: &CheckArgs) -> Result<i32> {
    let options = args.check_options();

    if !args.quiet {
        print_divider();
        eprintln!(
            "{} Checking subscriptions from {}",
            "▶".bright_cyan().bold(),
            args.subs.display()
        );
        eprintln!(
            "Probes: {} concurrent, {}s timeout, {}ms max delay",
            options.probe.concurrency, args.timeout_secs, args.max_delay_ms
        );
        eprintln!(
            "Batches: {} nodes (minimum {}), output to {}",
            options.batches.batch_size,
            options.batches.min_batch_size,
            options.output.root.display()
        );
        print_divider();
    }

    let fetcher = HttpFetcher::with_timeout(Duration::from_secs(args.fetch_timeout_secs))
        .context("failed to build the HTTP client")?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone(), args.quiet);

    let mut checker = Checker::new(options, Arc::new(fetcher)).with_cancellation_token(cancel);
    if !args.quiet {
        checker = checker.with_progress_callback(Arc::new(|msg: String| {
            eprintln!("{} {}", "•".bright_blue(), msg);
        }));
    }

    let report = checker.run_list(&args.subs).await?;
    debug!("Check finished: {:?}", report.outcome);

    if args.mark_failed {
        record_failed_subscriptions(&args.subs, &report, args.quiet);
    }

    let rendered = generate_check_report(&report, args.format)?;
    print!("{}", rendered);
    if matches!(args.format, ReportFormat::Json) {
        println!();
    }

    let code = outcome_exit_code(&report);
    if !args.quiet {
        match code {
            EXIT_WRITTEN => eprintln!("{} {}", "✓".green().bold(), report.outcome.describe()),
            EXIT_CANCELLED => eprintln!("{} cancelled", "⚠".yellow().bold()),
            _ => eprintln!("{} {}", "✗".red().bold(), report.outcome.describe()),
        }
    }
    Ok(code)
}

fn record_failed_subscriptions(list: &Path, report: &CheckReport, quiet: bool) {
    let failed = report.failed_urls();
    if failed.is_empty() {
        return;
    }
    match mark_failed_subscriptions(list, &failed) {
        Ok(0) => {}
        Ok(marked) => {
            if !quiet {
                eprintln!(
                    "{} Commented out {} failed subscription(s) in {}",
                    "⚠".yellow().bold(),
                    marked,
                    list.display()
                );
            }
        }
        Err(e) => warn!("Could not record failed subscriptions: {}", e),
    }
}

pub fn handle_decode(sub_matches: &ArgMatches) -> Result<i32> {
    let path = sub_matches
        .get_one::<PathBuf>("FILE")
        .context("no file given")?;
    let lines = decode_artifact(path)?;

    if sub_matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for line in &lines {
            println!("{}", line);
        }
    }
    Ok(EXIT_WRITTEN)
}
