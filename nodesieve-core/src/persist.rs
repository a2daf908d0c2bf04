// Batch partitioning and rotated run output

use crate::rank::RankedNode;
use chrono::{DateTime, Local};
use nodesieve_scanner::NodeDescriptor;
use nodesieve_scanner::codec::{decode_base64_text, encode_base64_text};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 666;
pub const DEFAULT_MIN_BATCH_SIZE: usize = 99;
pub const DEFAULT_KEEP_RUNS: usize = 5;

const RUN_PREFIX: &str = "run-";
const STAGING_SUFFIX: &str = ".partial";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory {} is not usable: {reason}", .path.display())]
    OutputRoot { path: PathBuf, reason: String },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a base64 encoded batch", .path.display())]
    Corrupt { path: PathBuf },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub min_batch_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
        }
    }
}

/// A group of nodes bound for one artifact. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBatch {
    pub index: usize,
    pub nodes: Vec<NodeDescriptor>,
}

impl OutputBatch {
    pub fn file_name(&self) -> String {
        format!("sub{}.txt", self.index)
    }

    /// Newline-joined descriptors, base64 encoded
    pub fn encode(&self) -> String {
        let joined = self
            .nodes
            .iter()
            .map(NodeDescriptor::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        encode_base64_text(&joined)
    }
}

/// A group that fell below the minimum size and was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBatch {
    /// 1-based position of the group in rank order
    pub position: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub accepted: Vec<OutputBatch>,
    pub skipped: Vec<SkippedBatch>,
}

/// Split ranked nodes into groups of `batch_size` in rank order; groups
/// smaller than `min_batch_size` are skipped.
pub fn plan_batches(ranked: &[RankedNode], settings: BatchSettings) -> BatchPlan {
    let mut plan = BatchPlan::default();

    for (position, chunk) in ranked.chunks(settings.batch_size.max(1)).enumerate() {
        if chunk.len() < settings.min_batch_size {
            warn!(
                "Skipping batch {} with {} nodes (minimum is {})",
                position + 1,
                chunk.len(),
                settings.min_batch_size
            );
            plan.skipped.push(SkippedBatch {
                position: position + 1,
                size: chunk.len(),
            });
            continue;
        }

        plan.accepted.push(OutputBatch {
            index: plan.accepted.len() + 1,
            nodes: chunk.iter().map(|n| n.descriptor.clone()).collect(),
        });
    }

    plan
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Directory holding one `run-*` directory per run
    pub root: PathBuf,
    /// How many run directories survive pruning, the new one included
    pub keep_runs: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
            keep_runs: DEFAULT_KEEP_RUNS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenArtifact {
    pub index: usize,
    pub nodes: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRun {
    pub directory: PathBuf,
    pub artifacts: Vec<WrittenArtifact>,
    pub pruned: Vec<PathBuf>,
}

/// Writes each run into a fresh `run-<timestamp>` directory under the
/// output root and prunes old runs.
///
/// Artifacts go to a hidden `.run-<timestamp>.partial` directory first,
/// which is renamed into place only after every file is written and
/// synced. A failed run removes its staging directory, so readers never
/// see half a run.
pub struct RunWriter {
    settings: OutputSettings,
}

impl RunWriter {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }

    /// Write the accepted batches of `plan`. Returns `None` without
    /// touching the filesystem when there is nothing to write.
    pub fn write(
        &self,
        plan: &BatchPlan,
        started: DateTime<Local>,
    ) -> Result<Option<WrittenRun>, PersistError> {
        if plan.accepted.is_empty() {
            return Ok(None);
        }

        let root = &self.settings.root;
        ensure_output_root(root)?;

        let name = self.unique_run_name(started);
        let staging = root.join(format!(".{}{}", name, STAGING_SUFFIX));
        let directory = root.join(&name);

        fs::create_dir(&staging).map_err(|e| PersistError::io(&staging, e))?;

        let written = match write_batches(&staging, &plan.accepted) {
            Ok(written) => written,
            Err(e) => {
                discard_staging(&staging);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &directory) {
            discard_staging(&staging);
            return Err(PersistError::io(&directory, e));
        }

        let artifacts = written
            .into_iter()
            .map(|(index, nodes, file_name)| WrittenArtifact {
                index,
                nodes,
                path: directory.join(file_name),
            })
            .collect::<Vec<_>>();

        info!(
            "Wrote {} batches to {}",
            artifacts.len(),
            directory.display()
        );

        let pruned = self.prune(&name);

        Ok(Some(WrittenRun {
            directory,
            artifacts,
            pruned,
        }))
    }

    fn unique_run_name(&self, started: DateTime<Local>) -> String {
        let stamp = started.format(STAMP_FORMAT).to_string();
        let root = &self.settings.root;
        let taken = |name: &str| {
            root.join(name).exists() || root.join(format!(".{}{}", name, STAGING_SUFFIX)).exists()
        };

        let base = format!("{}{}", RUN_PREFIX, stamp);
        if !taken(&base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Remove runs beyond `keep_runs` (oldest first, never `current`) and
    /// staging directories left behind by interrupted runs. Failures are
    /// logged; the new run is already in place.
    fn prune(&self, current: &str) -> Vec<PathBuf> {
        let root = &self.settings.root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list {} for pruning: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut runs: Vec<(RunKey, PathBuf)> = Vec::new();
        let mut stale = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if name == current {
                continue;
            }
            if name.starts_with('.') && name.ends_with(STAGING_SUFFIX) {
                if let Some(run) = name.strip_prefix('.').and_then(|n| n.strip_suffix(STAGING_SUFFIX))
                    && RunKey::parse(run).is_some()
                {
                    stale.push(path);
                }
            } else if let Some(key) = RunKey::parse(&name) {
                runs.push((key, path));
            }
        }

        // Newest first; the current run occupies one of the kept slots
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        let keep_others = self.settings.keep_runs.saturating_sub(1);
        let expired = runs.into_iter().skip(keep_others).map(|(_, path)| path);

        let mut pruned = Vec::new();
        for path in stale.into_iter().chain(expired) {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!("Pruned {}", path.display());
                    pruned.push(path);
                }
                Err(e) => warn!("Could not prune {}: {}", path.display(), e),
            }
        }
        pruned
    }
}

/// Sort key of a run directory name: `run-YYYYmmdd-HHMMSS[-n]`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RunKey {
    stamp: String,
    sequence: u32,
}

impl RunKey {
    fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(RUN_PREFIX)?;
        let (stamp, sequence) = match rest.get(15..) {
            Some("") => (rest, 1),
            Some(tail) => (&rest[..15], tail.strip_prefix('-')?.parse().ok()?),
            None => return None,
        };
        let valid = stamp.len() == 15
            && stamp.char_indices().all(|(i, c)| {
                if i == 8 { c == '-' } else { c.is_ascii_digit() }
            });
        valid.then(|| RunKey {
            stamp: stamp.to_string(),
            sequence,
        })
    }
}

fn ensure_output_root(root: &Path) -> Result<(), PersistError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(PersistError::OutputRoot {
                path: root.to_path_buf(),
                reason: "path is not a directory".into(),
            });
        }
        return Ok(());
    }
    fs::create_dir_all(root).map_err(|e| PersistError::OutputRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_batches(
    dir: &Path,
    batches: &[OutputBatch],
) -> Result<Vec<(usize, usize, String)>, PersistError> {
    let mut written = Vec::with_capacity(batches.len());
    for batch in batches {
        let file_name = batch.file_name();
        let path = dir.join(&file_name);
        let mut file = File::create(&path).map_err(|e| PersistError::io(&path, e))?;
        file.write_all(batch.encode().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| PersistError::io(&path, e))?;
        debug!("Wrote {} ({} nodes)", path.display(), batch.nodes.len());
        written.push((batch.index, batch.nodes.len(), file_name));
    }
    Ok(written)
}

fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!("Could not remove {}: {}", staging.display(), e);
    }
}

/// Read an artifact back into its descriptor lines
pub fn decode_artifact(path: &Path) -> Result<Vec<String>, PersistError> {
    let content = fs::read_to_string(path).map_err(|e| PersistError::io(path, e))?;
    let text = decode_base64_text(&content).ok_or_else(|| PersistError::Corrupt {
        path: path.to_path_buf(),
    })?;
    Ok(text.split('\n').map(String::from).collect())
}
