//! Criterion benchmarks for shac's hot paths: the fix planner resolving
//! and applying a large finding set (spec §4.H), and the finding store's
//! dedup/sort path a big phase-2 run exercises (spec §4.G).

use std::io::Write;

use criterion::{criterion_group, criterion_main, Criterion};

use shac::findings::FindingStore;
use shac::fixplan;
use shac::types::{Finding, Level};
use shac::workspace::Workspace;

fn synthetic_findings(n: u32) -> Vec<Finding> {
    (0..n)
        .map(|i| Finding {
            check_name: format!("check_{}", i % 20),
            level: Level::Error,
            message: Some(format!("finding {i}")),
            filepath: Some("file.txt".to_string()),
            line: Some(i + 1),
            col: Some(1),
            end_line: Some(i + 1),
            end_col: Some(4),
            replacements: vec!["XXX".to_string()],
        })
        .collect()
}

fn bench_fixplan(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut file = std::fs::File::create(dir.path().join("file.txt")).expect("create file");
    for _ in 0..1000 {
        writeln!(file, "aaa").expect("write line");
    }
    drop(file);
    let workspace = Workspace::new(dir.path());
    let findings = synthetic_findings(1000);

    c.bench_function("fixplan_plan_1000_findings", |b| {
        b.iter(|| {
            let plan = fixplan::plan(std::hint::black_box(&findings), &workspace).expect("plan");
            std::hint::black_box(plan)
        })
    });
}

fn bench_finding_store(c: &mut Criterion) {
    let findings = synthetic_findings(5000);

    c.bench_function("finding_store_push_and_sort_5000", |b| {
        b.iter(|| {
            let store = FindingStore::new();
            for finding in &findings {
                store.push(finding.clone());
            }
            std::hint::black_box(store.into_sorted_vec())
        })
    });
}

criterion_group!(benches, bench_fixplan, bench_finding_store);
criterion_main!(benches);
