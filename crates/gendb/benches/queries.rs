use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gendb::backend::{BfvBackend, SimulatedBackend};
use gendb::{
    Composition, EncryptedStore, EngineConfig, Filter, InterpolationComparator, QueryDescriptor,
    QueryEngine, SchemeContext, SchemeParametersBuilder, WorkerPool,
};
use rand::Rng;

fn random_table(num_rows: usize, num_columns: usize) -> Vec<Vec<u64>> {
    let mut rng = rand::rng();
    (0..num_columns)
        .map(|_| (0..num_rows).map(|_| rng.random_range(0..3)).collect())
        .collect()
}

pub fn bfv_queries(c: &mut Criterion) {
    let _ = env_logger::try_init();

    let mut group = c.benchmark_group("bfv_queries");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(600));
    group.measurement_time(Duration::from_millis(1000));

    let params = SchemeParametersBuilder::new()
        .set_degree(4096)
        .set_plaintext_modulus(65537)
        .set_moduli_sizes(&[62; 5])
        .build()
        .unwrap();
    let context = SchemeContext::new(BfvBackend::new(&params).unwrap()).unwrap();
    let store = EncryptedStore::set_data(&context, &random_table(3000, 8)).unwrap();
    let config = EngineConfig::default();
    let comparator =
        InterpolationComparator::new(config.comparator_bits, params.plaintext()).unwrap();
    let engine = QueryEngine::new(&context, &store, &config).with_comparator(&comparator);
    let pool = WorkerPool::new(4).unwrap();

    for num_filters in [1, 2, 4, 8] {
        let filters = (0..num_filters).map(|c| Filter::new(c, 1)).collect();
        let descriptor = QueryDescriptor::new(Composition::Conjunctive, filters);

        group.bench_function(BenchmarkId::new("count", num_filters), |b| {
            b.iter(|| engine.count(&descriptor).unwrap());
        });
        group.bench_function(BenchmarkId::new("count_p", num_filters), |b| {
            b.iter(|| engine.count_p(&pool, &descriptor).unwrap());
        });
        group.bench_function(BenchmarkId::new("maf", num_filters), |b| {
            b.iter(|| engine.maf(0, &descriptor).unwrap());
        });
    }

    let weights = (0..8).map(|c| (c, 3 - c as i64)).collect::<Vec<_>>();
    group.bench_function("prs", |b| b.iter(|| engine.prs(&weights).unwrap()));
    group.bench_function("prs_p", |b| b.iter(|| engine.prs_p(&pool, &weights).unwrap()));
    let query = context.encrypt_query(&[1, 0, 2]).unwrap();
    group.bench_function("similarity", |b| {
        b.iter(|| engine.similarity(7, &query, 2).unwrap())
    });

    group.finish();
}

pub fn simulated_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_queries");
    group.sample_size(10);

    for num_rows in [1000, 10000] {
        let context = SchemeContext::new(SimulatedBackend::new(2048, 65537).unwrap()).unwrap();
        let store = EncryptedStore::set_data(&context, &random_table(num_rows, 4)).unwrap();
        let config = EngineConfig::default();
        let engine = QueryEngine::new(&context, &store, &config);
        let descriptor = QueryDescriptor::new(
            Composition::Disjunctive,
            vec![Filter::new(0, 0), Filter::new(1, 2), Filter::new(3, 1)],
        );
        group.bench_function(BenchmarkId::new("count", num_rows), |b| {
            b.iter(|| engine.count(&descriptor).unwrap());
        });
    }

    group.finish();
}

criterion_group!(queries, bfv_queries, simulated_queries);
criterion_main!(queries);
