// Tests for batch planning and run output

use chrono::{Local, TimeZone};
use nodesieve_core::persist::{
    BatchSettings, OutputSettings, PersistError, RunWriter, decode_artifact, plan_batches,
};
use nodesieve_core::rank::RankedNode;
use nodesieve_scanner::NodeDescriptor;
use std::fs;
use tempfile::TempDir;

fn ranked(count: usize) -> Vec<RankedNode> {
    (0..count)
        .map(|i| RankedNode {
            descriptor: NodeDescriptor::parse(&format!("ss://YWVzOnB3@10.0.{}.{}:8388#n{}", i / 256, i % 256, i))
                .unwrap(),
            latency_ms: i as u64,
        })
        .collect()
}

fn stamp(second: u32) -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 1, 12, 0, second).unwrap()
}

fn writer(root: &std::path::Path, keep_runs: usize) -> RunWriter {
    RunWriter::new(OutputSettings {
        root: root.to_path_buf(),
        keep_runs,
    })
}

fn run_dirs(root: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Batch planning
// ============================================================================

#[test]
fn test_plan_skips_undersized_remainder() {
    let settings = BatchSettings {
        batch_size: 100,
        min_batch_size: 99,
    };

    let plan = plan_batches(&ranked(120), settings);

    assert_eq!(plan.accepted.len(), 1);
    assert_eq!(plan.accepted[0].index, 1);
    assert_eq!(plan.accepted[0].nodes.len(), 100);
    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.skipped[0].position, 2);
    assert_eq!(plan.skipped[0].size, 20);
}

#[test]
fn test_plan_keeps_rank_order() {
    let nodes = ranked(10);
    let plan = plan_batches(
        &nodes,
        BatchSettings {
            batch_size: 4,
            min_batch_size: 2,
        },
    );

    assert_eq!(plan.accepted.len(), 3);
    assert_eq!(plan.accepted[2].nodes.len(), 2);
    let flattened: Vec<_> = plan.accepted.iter().flat_map(|b| b.nodes.clone()).collect();
    let expected: Vec<_> = nodes.into_iter().map(|n| n.descriptor).collect();
    assert_eq!(flattened, expected);
}

#[test]
fn test_plan_accepts_exactly_minimum() {
    let plan = plan_batches(
        &ranked(99),
        BatchSettings {
            batch_size: 666,
            min_batch_size: 99,
        },
    );
    assert_eq!(plan.accepted.len(), 1);
    assert!(plan.skipped.is_empty());
}

#[test]
fn test_plan_empty_input() {
    let plan = plan_batches(&[], BatchSettings::default());
    assert!(plan.accepted.is_empty());
    assert!(plan.skipped.is_empty());
}

#[test]
fn test_batch_file_names() {
    let plan = plan_batches(
        &ranked(6),
        BatchSettings {
            batch_size: 2,
            min_batch_size: 1,
        },
    );
    let names: Vec<_> = plan.accepted.iter().map(|b| b.file_name()).collect();
    assert_eq!(names, vec!["sub1.txt", "sub2.txt", "sub3.txt"]);
}

// ============================================================================
// Writing runs
// ============================================================================

#[test]
fn test_artifact_decodes_to_batch() {
    let dir = TempDir::new().unwrap();
    let plan = plan_batches(
        &ranked(5),
        BatchSettings {
            batch_size: 5,
            min_batch_size: 1,
        },
    );

    let run = writer(dir.path(), 5)
        .write(&plan, stamp(0))
        .unwrap()
        .unwrap();

    assert_eq!(run.artifacts.len(), 1);
    let artifact = &run.artifacts[0];
    assert_eq!(artifact.nodes, 5);
    assert!(artifact.path.ends_with("run-20260301-120000/sub1.txt"));

    let raw = fs::read_to_string(&artifact.path).unwrap();
    assert!(!raw.ends_with('\n'));

    let lines = decode_artifact(&artifact.path).unwrap();
    let expected: Vec<_> = plan.accepted[0]
        .nodes
        .iter()
        .map(|n| n.as_str().to_string())
        .collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_nothing_written_without_accepted_batches() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("output");
    let plan = plan_batches(
        &ranked(3),
        BatchSettings {
            batch_size: 10,
            min_batch_size: 5,
        },
    );

    let run = writer(&root, 5).write(&plan, stamp(0)).unwrap();

    assert!(run.is_none());
    assert!(!root.exists());
}

#[test]
fn test_output_root_is_created() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("output");
    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });

    let run = writer(&root, 5).write(&plan, stamp(0)).unwrap().unwrap();

    assert!(run.directory.is_dir());
    assert_eq!(run_dirs(&root), vec!["run-20260301-120000"]);
}

#[test]
fn test_same_timestamp_gets_suffix() {
    let dir = TempDir::new().unwrap();
    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    let writer = writer(dir.path(), 5);

    writer.write(&plan, stamp(0)).unwrap();
    writer.write(&plan, stamp(0)).unwrap();
    let third = writer.write(&plan, stamp(0)).unwrap().unwrap();

    assert!(third.directory.ends_with("run-20260301-120000-3"));
    assert_eq!(
        run_dirs(dir.path()),
        vec![
            "run-20260301-120000",
            "run-20260301-120000-2",
            "run-20260301-120000-3"
        ]
    );
}

#[test]
fn test_old_runs_are_pruned() {
    let dir = TempDir::new().unwrap();
    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    let writer = writer(dir.path(), 3);

    for second in 0..5 {
        writer.write(&plan, stamp(second)).unwrap();
    }

    assert_eq!(
        run_dirs(dir.path()),
        vec![
            "run-20260301-120002",
            "run-20260301-120003",
            "run-20260301-120004"
        ]
    );
}

#[test]
fn test_pruning_reports_removed_runs() {
    let dir = TempDir::new().unwrap();
    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    let writer = writer(dir.path(), 1);

    writer.write(&plan, stamp(0)).unwrap();
    let second = writer.write(&plan, stamp(1)).unwrap().unwrap();

    assert_eq!(second.pruned.len(), 1);
    assert!(second.pruned[0].ends_with("run-20260301-120000"));
    assert_eq!(run_dirs(dir.path()), vec!["run-20260301-120001"]);
}

#[test]
fn test_stale_staging_and_foreign_entries() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join(".run-20260101-000000.partial")).unwrap();
    fs::create_dir(dir.path().join("keep-me")).unwrap();
    fs::write(dir.path().join("notes.txt"), "hello").unwrap();

    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    writer(dir.path(), 1).write(&plan, stamp(0)).unwrap();

    assert_eq!(
        run_dirs(dir.path()),
        vec!["keep-me", "notes.txt", "run-20260301-120000"]
    );
}

#[test]
fn test_repeated_runs_replace_contents() {
    let dir = TempDir::new().unwrap();
    let writer = writer(dir.path(), 1);

    let first = plan_batches(&ranked(4), BatchSettings { batch_size: 2, min_batch_size: 1 });
    writer.write(&first, stamp(0)).unwrap();

    let second = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    let run = writer.write(&second, stamp(1)).unwrap().unwrap();

    let files: Vec<_> = fs::read_dir(&run.directory).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(run_dirs(dir.path()).len(), 1);
}

#[test]
fn test_root_that_is_a_file_fails() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("output");
    fs::write(&root, "not a directory").unwrap();

    let plan = plan_batches(&ranked(2), BatchSettings { batch_size: 2, min_batch_size: 1 });
    let result = writer(&root, 5).write(&plan, stamp(0));

    assert!(matches!(result, Err(PersistError::OutputRoot { .. })));
}

#[test]
fn test_decode_artifact_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sub1.txt");
    fs::write(&path, "*** not base64 ***").unwrap();

    assert!(matches!(
        decode_artifact(&path),
        Err(PersistError::Corrupt { .. })
    ));
}
