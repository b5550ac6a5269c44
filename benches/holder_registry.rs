//! Benchmarks for holder registration churn and budgeted gray-root tracing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use ccbridge::test_utils::MockEngine;
use ccbridge::{
    BridgeConfig, ChannelScheduler, CollectorContext, FnTracer, GcCell, HolderId, HolderTracer, SingleZoneCheck,
    SliceBudget, TraceKind, Tracer, TracerRef, ZoneId,
};

/// Holder class with one edge per holder and no bookkeeping.
struct OneEdge {
    single_zone: bool,
}

impl HolderTracer for OneEdge {
    fn class_name(&self) -> &'static str {
        "OneEdge"
    }

    fn is_single_zone(&self) -> bool {
        self.single_zone
    }

    fn trace(&self, holder: HolderId, tracer: &mut dyn Tracer) {
        tracer.on_edge(GcCell::new(holder.0 as u64, TraceKind::Object, ZoneId(1)), "bench edge");
    }

    fn clear(&self, _holder: HolderId) {}
}

fn context() -> CollectorContext {
    let config = BridgeConfig::default().with_single_zone_check(SingleZoneCheck::Never);
    CollectorContext::new(config, Arc::new(ChannelScheduler::new()))
}

fn registry_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("holder_registry");
    let tracer: TracerRef = Arc::new(OneEdge { single_zone: true });

    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("add_remove", count), &count, |b, &count| {
            let mut cx = context();
            b.iter(|| {
                for i in 0..count {
                    let zone = Some(ZoneId((i % 8) as u32 + 1));
                    cx.add_holder(HolderId(i), tracer.clone(), zone).unwrap();
                }
                for i in 0..count {
                    black_box(cx.remove_holder(HolderId(i)));
                }
            });
        });
    }

    group.finish();
}

fn budgeted_gray_tracing(c: &mut Criterion) {
    let mut group = c.benchmark_group("gray_roots");
    let engine = MockEngine::new();
    let tracer: TracerRef = Arc::new(OneEdge { single_zone: false });
    let mut cx = context();
    for i in 0..10_000 {
        cx.add_holder(HolderId(i), tracer.clone(), None).unwrap();
    }

    for &slice in &[64u64, 1_024, u64::MAX] {
        group.bench_with_input(BenchmarkId::new("trace_in_slices", slice), &slice, |b, &slice| {
            b.iter(|| {
                let mut edges = 0usize;
                let mut marker = FnTracer::marking(|_, _: &str| edges += 1);
                while !cx.trace_gray_roots(&engine, &mut marker, &mut SliceBudget::work(slice)) {}
                black_box(edges)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, registry_churn, budgeted_gray_tracing);
criterion_main!(benches);
