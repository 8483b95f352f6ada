use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use clap::Parser;

use mrd_standalone::{run, Args};

const TEXTS: &[&str] = &[
    "the quick brown fox jumps over the lazy dog",
    "The dog barks; the fox runs.\nA fox, a dog, a hen.",
    "",
    "hen hen hen egg",
];

fn write_inputs(dir: &Path) {
    for (i, text) in TEXTS.iter().enumerate() {
        fs::write(dir.join(format!("input-{i}.txt")), text).unwrap();
    }
}

fn sequential_count() -> Vec<String> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for text in TEXTS {
        for word in text.split(|c: char| !c.is_alphabetic()).filter(|w| !w.is_empty()) {
            *counts.entry(word).or_default() += 1;
        }
    }
    counts.into_iter().map(|(w, n)| format!("{w}: {n}")).collect()
}

fn args(dir: &Path, extra: &[&str]) -> Args {
    let input = dir.join("input-*.txt").to_string_lossy().into_owned();
    let work_dir = dir.join("work").to_string_lossy().into_owned();
    let mut argv = vec![
        "mrd-standalone".to_string(),
        "--input".into(),
        input,
        "--work-dir".into(),
        work_dir,
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    Args::parse_from(argv)
}

fn output_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn matches_sequential_count() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let report = run(args(dir.path(), &["--n-reduce", "3", "--workers", "2"]))
        .await
        .unwrap();

    assert_eq!(report.job_name, "wc");
    assert_eq!(report.map.ntasks, TEXTS.len());
    assert_eq!(report.reduce.ntasks, 3);
    assert_eq!(report.map.failures, 0);
    assert_eq!(output_lines(&report.output), sequential_count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn survives_injected_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let report = run(args(
        dir.path(),
        &[
            "--job",
            "flaky",
            "--n-reduce",
            "5",
            "--workers",
            "3",
            "--failure-rate",
            "0.3",
            "--lost-reply-rate",
            "0.2",
            "--backoff-ms",
            "1",
        ],
    ))
    .await
    .unwrap();

    assert!(report.map.attempts >= TEXTS.len() as u32);
    assert_eq!(
        report.map.attempts + report.reduce.attempts,
        TEXTS.len() as u32 + 5 + report.map.failures + report.reduce.failures
    );
    assert_eq!(output_lines(&report.output), sequential_count());
}

#[tokio::test]
async fn more_reducers_than_keys_leaves_partitions_absent() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("input-0.txt"), "solo").unwrap();

    let report = run(args(dir.path(), &["--n-reduce", "16", "--workers", "2", "--clean"]))
        .await
        .unwrap();

    assert_eq!(output_lines(&report.output), vec!["solo: 1"]);
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("work"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != "mrtmp.wc")
        .collect();
    assert!(leftovers.is_empty(), "intermediate files left: {leftovers:?}");
}

#[tokio::test]
async fn gives_up_when_every_call_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let err = run(args(
        dir.path(),
        &["--failure-rate", "1", "--max-attempts", "2", "--backoff-ms", "1"],
    ))
    .await
    .unwrap_err();

    assert!(format!("{err:#}").contains("map phase failed"));
}

#[tokio::test]
async fn rejects_unknown_workload() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let err = run(args(dir.path(), &["--workload", "grep"])).await.unwrap_err();
    assert!(err.to_string().contains("unknown workload"));
}
