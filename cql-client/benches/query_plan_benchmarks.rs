//! Benchmarks for query plan generation.
//!
//! These measure the per-request cost of the load balancing policies,
//! including the token lookup done by token-aware routing.

use std::net::SocketAddr;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cql_client::{
    DcAwareRoundRobinPolicy, ExecutionOptions, Host, HostInfo, HostRegistry, LoadBalancingPolicy,
    MonotonicTimestampGenerator, RoundRobinPolicy, TimestampGenerator, Token, TokenAwarePolicy,
};

fn registry(hosts: usize) -> Arc<HostRegistry> {
    let registry = Arc::new(HostRegistry::new());
    for i in 0..hosts {
        let ip = format!("10.0.{}.{}", i / 250, i % 250 + 1).parse().unwrap();
        let dc = if i % 2 == 0 { "dc1" } else { "dc2" };
        let token = Token((i as i64).wrapping_mul(i64::MAX / hosts as i64 * 2));
        let info = HostInfo::new(ip, 9042)
            .with_datacenter(dc)
            .with_tokens(vec![token]);
        registry.add_host(Host::from_info(SocketAddr::new(ip, 9042), info));
    }
    registry
}

fn benchmark_round_robin_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_robin_plan");
    group.throughput(Throughput::Elements(1));

    for hosts in [3, 30, 300] {
        let policy = RoundRobinPolicy::new();
        policy.init(registry(hosts)).unwrap();
        let options = ExecutionOptions::default();

        group.bench_with_input(BenchmarkId::new("hosts", hosts), &hosts, |b, _| {
            b.iter(|| {
                let first = policy.new_query_plan(None, &options).next();
                black_box(first)
            })
        });
    }
    group.finish();
}

fn benchmark_dc_aware_full_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("dc_aware_full_plan");

    for hosts in [6, 60] {
        let policy = DcAwareRoundRobinPolicy::with_local_dc("dc1").used_hosts_per_remote_dc(2);
        policy.init(registry(hosts)).unwrap();
        let options = ExecutionOptions::default();

        group.bench_with_input(BenchmarkId::new("hosts", hosts), &hosts, |b, _| {
            b.iter(|| black_box(policy.new_query_plan(None, &options).count()))
        });
    }
    group.finish();
}

fn benchmark_token_aware_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_aware_plan");
    group.throughput(Throughput::Elements(1));

    let registry = registry(60);
    registry.set_replication_factor("ks", 3);
    let policy = TokenAwarePolicy::new(Arc::new(DcAwareRoundRobinPolicy::with_local_dc("dc1")));
    policy.init(registry).unwrap();

    for key_size in [8, 64, 512] {
        let options = ExecutionOptions::builder()
            .keyspace("ks")
            .routing_key(vec![7u8; key_size])
            .build()
            .unwrap();

        group.bench_with_input(BenchmarkId::new("key_size", key_size), &options, |b, options| {
            b.iter(|| {
                let first = policy.new_query_plan(Some("ks"), options).next();
                black_box(first)
            })
        });
    }
    group.finish();
}

fn benchmark_timestamp_generation(c: &mut Criterion) {
    let generator = MonotonicTimestampGenerator::default();
    c.bench_function("monotonic_timestamp", |b| b.iter(|| black_box(generator.next())));
}

criterion_group!(
    benches,
    benchmark_round_robin_plan,
    benchmark_dc_aware_full_plan,
    benchmark_token_aware_plan,
    benchmark_timestamp_generation
);
criterion_main!(benches);
