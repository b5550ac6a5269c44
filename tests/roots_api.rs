use ccbridge::test_utils::{MockEngine, RecordingTracer, TestHolder};
use ccbridge::{
    BlackRootSource, BridgeConfig, ChannelScheduler, CollectorContext, GcCell, HolderId, HolderKey, SingleZoneCheck,
    SliceBudget, TraceKind, Tracer, ZoneId,
};
use std::sync::Arc;

const Z1: ZoneId = ZoneId(1);
const Z2: ZoneId = ZoneId(2);
const Z3: ZoneId = ZoneId(3);

fn context() -> CollectorContext {
    CollectorContext::new(BridgeConfig::default(), Arc::new(ChannelScheduler::new()))
}

#[test]
fn zone_filtered_gray_pass_traces_multi_zone_holders() {
    let mut cx = context();
    let engine = MockEngine::new();
    engine.set_collecting_zones(&[Z1, Z2]);

    let single = Arc::new(TestHolder::single_zone("Single"));
    let multi = Arc::new(TestHolder::multi_zone("Multi"));
    let a = HolderId(0xA);
    let b = HolderId(0xB);
    let c = HolderId(0xC);
    let d = HolderId(0xD);
    cx.add_holder(a, single.clone(), Some(Z1)).unwrap();
    cx.add_holder(b, single.clone(), Some(Z2)).unwrap();
    cx.add_holder(c, multi.clone(), Some(Z3)).unwrap();
    cx.add_holder(d, single.clone(), Some(Z3)).unwrap();

    let mut tracer = RecordingTracer::marking();
    assert!(cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::unlimited()));

    let mut traced = single.traced();
    traced.extend(multi.traced());
    traced.sort_unstable();
    assert_eq!(traced, vec![a, b, c]);
}

#[test]
fn atoms_collection_disables_zone_filtering() {
    let mut cx = context();
    let engine = MockEngine::new();
    engine.set_collecting_zones(&[Z1]);
    engine.set_atoms_collecting(true);

    let single = Arc::new(TestHolder::single_zone("Single"));
    cx.add_holder(HolderId(1), single.clone(), Some(Z1)).unwrap();
    cx.add_holder(HolderId(2), single.clone(), Some(Z2)).unwrap();

    let mut tracer = RecordingTracer::marking();
    assert!(cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::unlimited()));
    assert_eq!(single.trace_count(), 2);
}

#[test]
fn non_marking_tracer_visits_every_zone() {
    let mut cx = context();
    let engine = MockEngine::new();
    engine.set_collecting_zones(&[]);

    let single = Arc::new(TestHolder::single_zone("Single"));
    cx.add_holder(HolderId(1), single.clone(), Some(Z1)).unwrap();

    let mut tracer = RecordingTracer::new();
    assert!(cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::unlimited()));
    assert_eq!(single.traced(), vec![HolderId(1)]);
}

#[test]
fn double_remove_returns_none() {
    let mut cx = context();
    let holder = Arc::new(TestHolder::multi_zone("h"));
    cx.add_holder(HolderId(7), holder.clone(), None).unwrap();

    assert!(cx.remove_holder(HolderId(7)).is_some());
    assert!(cx.remove_holder(HolderId(7)).is_none());
    assert!(cx.get_holder(HolderId(7)).is_none());
    assert_eq!(holder.cleared(), vec![HolderId(7)]);
}

#[test]
fn removed_holder_is_never_traced_again() {
    let mut cx = context();
    let engine = MockEngine::new();
    let holder = Arc::new(TestHolder::multi_zone("h"));
    let key = HolderKey::new();
    cx.add_holder(HolderId(1), holder.clone(), None).unwrap();
    cx.add_holder(HolderId(2), holder.clone(), None).unwrap();
    cx.add_holder_with_key(HolderId(3), holder.clone(), &key).unwrap();

    cx.remove_holder(HolderId(1));
    cx.remove_holder_with_key(HolderId(3), &key);
    assert!(!key.is_registered());

    cx.trace_black_roots(&mut RecordingTracer::new());
    cx.trace_all_gray_roots(&engine, &mut RecordingTracer::new());
    assert_eq!(holder.traced(), vec![HolderId(2)]);
}

#[test]
fn removal_mid_pass_is_never_traced() {
    let mut cx = context();
    let engine = MockEngine::new();
    let holder = Arc::new(TestHolder::multi_zone("h"));
    for i in 0..6 {
        cx.add_holder(HolderId(i), holder.clone(), None).unwrap();
    }

    let mut tracer = RecordingTracer::marking();
    assert!(!cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::work(2)));
    let seen = holder.traced();
    assert_eq!(seen.len(), 2);

    let pending: Vec<HolderId> = (0..6).map(HolderId).filter(|h| !seen.contains(h)).collect();
    let removed = pending[0];
    cx.remove_holder(removed);

    while !cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::work(1)) {}

    assert_eq!(holder.times_traced(removed), 0);
    for id in (0..6).map(HolderId).filter(|h| *h != removed) {
        assert_eq!(holder.times_traced(id), 1, "holder {id:?}");
    }
}

#[test]
fn keyed_holders_traced_after_mapped_holders() {
    let mut cx = context();
    let engine = MockEngine::new();
    let holder = Arc::new(TestHolder::multi_zone("h"));
    let keys: Vec<HolderKey> = (0..3).map(|_| HolderKey::new()).collect();
    cx.add_holder(HolderId(100), holder.clone(), None).unwrap();
    for (i, key) in keys.iter().enumerate() {
        cx.add_holder_with_key(HolderId(i), holder.clone(), key).unwrap();
    }

    let mut tracer = RecordingTracer::marking();
    let mut slices = 0;
    while !cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::work(1)) {
        slices += 1;
    }
    assert_eq!(slices, 3);
    assert_eq!(holder.traced()[0], HolderId(100));
    assert_eq!(holder.trace_count(), 4);
}

struct PendingJobs(Vec<GcCell>);

impl BlackRootSource for PendingJobs {
    fn name(&self) -> &'static str {
        "pending jobs"
    }

    fn trace(&self, tracer: &mut dyn Tracer) {
        for job in &self.0 {
            tracer.on_edge(*job, "pending job");
        }
    }
}

#[test]
fn black_roots_do_not_touch_holders() {
    let mut cx = context();
    let job = GcCell::new(1, TraceKind::Function, Z1);
    cx.add_black_root_source(Arc::new(PendingJobs(vec![job])));
    let holder = Arc::new(TestHolder::multi_zone("h"));
    cx.add_holder(HolderId(1), holder.clone(), None).unwrap();

    let mut tracer = RecordingTracer::new();
    cx.trace_black_roots(&mut tracer);
    assert_eq!(tracer.cells(), vec![job]);
    assert_eq!(holder.trace_count(), 0);
}

#[test]
fn single_zone_check_can_be_disabled() {
    let config = BridgeConfig::default().with_single_zone_check(SingleZoneCheck::Never);
    let mut cx = CollectorContext::new(config, Arc::new(ChannelScheduler::new()));
    let engine = MockEngine::new();
    let holder = Arc::new(TestHolder::single_zone("Mixed"));
    holder.set_edges(
        HolderId(1),
        vec![GcCell::new(1, TraceKind::Object, Z1), GcCell::new(2, TraceKind::Object, Z2)],
    );
    cx.add_holder(HolderId(1), holder, Some(Z1)).unwrap();

    let mut tracer = RecordingTracer::new();
    cx.trace_all_gray_roots(&engine, &mut tracer);
    assert_eq!(tracer.cells().len(), 2);
}
