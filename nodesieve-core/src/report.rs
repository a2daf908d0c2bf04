// Run report rendering

use crate::gather::FailedFetch;
use crate::persist::{SkippedBatch, WrittenArtifact};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DIVIDER: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    /// At least one batch was written
    Written,
    /// No descriptors were found, or none of them was reachable
    NoUsableNodes,
    /// Reachable nodes exist but every group was below the minimum size
    NoBatchMetMinimum,
    /// Interrupted before a batch could be written
    Cancelled,
}

impl CheckOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            CheckOutcome::Written => "batches written",
            CheckOutcome::NoUsableNodes => "no usable nodes",
            CheckOutcome::NoBatchMetMinimum => "no batch met the minimum size",
            CheckOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub subscriptions: usize,
    pub subscriptions_fetched: usize,
    pub failed_subscriptions: Vec<FailedFetch>,
    pub candidates: usize,
    pub unique_nodes: usize,
    pub invalid_nodes: usize,
    pub duplicate_nodes: usize,
    pub probed: usize,
    pub reachable: usize,
    pub retained: usize,
    pub batches: Vec<WrittenArtifact>,
    pub skipped_batches: Vec<SkippedBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_directory: Option<PathBuf>,
    pub pruned_runs: Vec<PathBuf>,
    pub cancelled: bool,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    pub(crate) fn empty(subscriptions: usize) -> Self {
        Self {
            subscriptions,
            subscriptions_fetched: 0,
            failed_subscriptions: Vec::new(),
            candidates: 0,
            unique_nodes: 0,
            invalid_nodes: 0,
            duplicate_nodes: 0,
            probed: 0,
            reachable: 0,
            retained: 0,
            batches: Vec::new(),
            skipped_batches: Vec::new(),
            run_directory: None,
            pruned_runs: Vec::new(),
            cancelled: false,
            outcome: CheckOutcome::NoUsableNodes,
        }
    }

    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed_subscriptions
            .iter()
            .map(|f| f.url.as_str())
            .collect()
    }
}

pub fn generate_check_report(
    report: &CheckReport,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(report)),
        ReportFormat::Json => serde_json::to_string_pretty(report),
    }
}

pub fn generate_text_report(report: &CheckReport) -> String {
    let mut out = String::new();

    out.push_str(DIVIDER);
    out.push_str("                           NODESIEVE CHECK REPORT\n");
    out.push_str(DIVIDER);
    out.push('\n');

    out.push_str(&format!("Outcome:        {}\n", report.outcome.describe()));
    out.push_str(&format!(
        "Subscriptions:  {} fetched, {} failed, {} listed\n",
        report.subscriptions_fetched,
        report.failed_subscriptions.len(),
        report.subscriptions
    ));
    out.push_str(&format!(
        "Nodes:          {} candidates, {} unique, {} duplicate, {} invalid\n",
        report.candidates, report.unique_nodes, report.duplicate_nodes, report.invalid_nodes
    ));
    out.push_str(&format!(
        "Probed:         {} ({} reachable, {} retained)\n",
        report.probed, report.reachable, report.retained
    ));
    if report.cancelled {
        out.push_str("Interrupted:    yes, results are partial\n");
    }
    out.push('\n');

    if !report.batches.is_empty() {
        out.push_str(DIVIDER);
        out.push_str("BATCHES\n");
        out.push_str(DIVIDER);
        out.push('\n');
        if let Some(dir) = &report.run_directory {
            out.push_str(&format!("Run directory:  {}\n\n", dir.display()));
        }
        for artifact in &report.batches {
            out.push_str(&format!(
                "  [{}] {} nodes  {}\n",
                artifact.index,
                artifact.nodes,
                artifact.path.display()
            ));
        }
        out.push('\n');
    }

    if !report.skipped_batches.is_empty() {
        out.push_str("Skipped (below minimum size):\n");
        for skipped in &report.skipped_batches {
            out.push_str(&format!(
                "  group {} with {} nodes\n",
                skipped.position, skipped.size
            ));
        }
        out.push('\n');
    }

    if !report.failed_subscriptions.is_empty() {
        out.push_str(DIVIDER);
        out.push_str("FAILED SUBSCRIPTIONS\n");
        out.push_str(DIVIDER);
        out.push('\n');
        for failed in &report.failed_subscriptions {
            out.push_str(&format!("  {}\n    {}\n", failed.url, failed.reason));
        }
        out.push('\n');
    }

    if !report.pruned_runs.is_empty() {
        out.push_str(&format!("Pruned {} old run(s)\n", report.pruned_runs.len()));
    }

    out
}
