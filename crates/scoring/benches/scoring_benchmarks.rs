use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use skillgraph_core::{EmployeeId, SkillId};
use skillgraph_scoring::{
    merge, ScoringEngine, SignalSource, SkillKey, SkillObservation, SkillRecord,
};
use uuid::Uuid;

fn observation(i: u64) -> SkillObservation {
    SkillObservation {
        employee_id: EmployeeId::new(),
        skill_name: "Rust".to_string(),
        category: "language".to_string(),
        frequency: (i % 10_000) as f64,
        recency_days: (i % 800) as u32,
        complexity_score: (i % 100) as f64 / 100.0,
        duration_months: (i % 24) as f64,
        depth_score: (i % 12_000) as f64,
        projects_used: (i % 7) as u32,
        lines_of_code: if i % 5 == 0 { None } else { Some(i * 13) },
        observed_at: Utc::now(),
        source: SignalSource::Github,
        run_id: Uuid::now_v7(),
    }
}

fn bench_score(c: &mut Criterion) {
    let engine = ScoringEngine::default();
    let obs = observation(4_242);

    c.bench_function("score_single_observation", |b| {
        b.iter(|| engine.score(black_box(&obs), None));
    });
}

fn bench_merge_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_history");
    let engine = ScoringEngine::default();
    let key = SkillKey::new(EmployeeId::new(), SkillId::new());

    for runs in [10u64, 100, 1_000] {
        let observations: Vec<_> = (0..runs).map(observation).collect();
        group.throughput(Throughput::Elements(runs));
        group.bench_with_input(BenchmarkId::from_parameter(runs), &observations, |b, obs| {
            b.iter(|| {
                let mut record: Option<SkillRecord> = None;
                for o in obs {
                    record = Some(merge(&engine, key, record.as_ref(), o));
                }
                black_box(record)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_score, bench_merge_history);
criterion_main!(benches);
