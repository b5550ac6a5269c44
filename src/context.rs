//! The collector context: one owner for every piece of bridge state.
//!
//! The GC engine is borrowed for the duration of each call instead of being
//! stored, so the context never outlives the runtime it serves.

use std::sync::Arc;

use crate::budget::SliceBudget;
use crate::config::BridgeConfig;
use crate::engine::{GcEngine, GcReason, GcStatus, Tracer, WeakMapEntry};
use crate::error::{report_invariant_violation, BridgeError, BridgeResult};
use crate::finalization::{DeferredFinalizationQueue, DeferredFinalizeType, FinalizeGroup, Scheduler};
use crate::holders::{HolderKey, HolderRegistry, TracerRef};
use crate::lifecycle::{finalize_type_for_gc_end, OomKind, OomState, OomTracker, ZonesWaitingForGc};
use crate::roots::{BlackRootSource, RootTracingDispatcher};
use crate::traversal::{
    traverse_holders, CcNode, GraphTraversal, NativeChildren, NoteRootCallback, TraversalCallback,
    TraversalFlags, TraverseSelect,
};
use crate::types::{GcCell, HolderId, ZoneId};
use crate::weak_maps;

/// Embedding-specific extensions. Every method defaults to doing nothing.
pub trait RuntimeHooks {
    /// Trace roots that are always alive, after the registered black root
    /// sources.
    fn trace_additional_black_roots(&self, _tracer: &mut dyn Tracer) {}

    /// Trace extra gray roots. Runs once per gray pass, before the
    /// registries.
    fn trace_additional_gray_roots(&self, _tracer: &mut dyn Tracer) {}

    /// Report extra native roots to the cycle collector.
    fn traverse_additional_native_roots(&self, _cb: &mut dyn NoteRootCallback) {}

    /// Called at GC begin, before zones are selected.
    fn prepare_for_gc(&self) {}

    fn custom_gc_callback(&self, _status: GcStatus) {}

    fn custom_out_of_memory_callback(&self) {}

    fn custom_large_allocation_failure_callback(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RuntimeHooks for NoHooks {}

/// Reports every root still reachable at shutdown.
#[derive(Default)]
struct LeakReporter {
    leaked: usize,
}

impl Tracer for LeakReporter {
    fn on_edge(&mut self, cell: GcCell, name: &str) {
        self.leaked += 1;
        tracing::warn!(target: "ccbridge::shutdown", %cell, edge = name, "root still alive at shutdown");
    }
}

/// Per-runtime bridge state: the holder registry, root dispatch, deferred
/// finalization and the GC lifecycle callbacks that tie them together.
pub struct CollectorContext {
    config: BridgeConfig,
    registry: HolderRegistry,
    roots: RootTracingDispatcher,
    finalizer: DeferredFinalizationQueue,
    oom: OomTracker,
    zones_waiting: ZonesWaitingForGc,
    hooks: Box<dyn RuntimeHooks>,
    native_children: Vec<Arc<dyn NativeChildren>>,
    shut_down: bool,
}

impl CollectorContext {
    pub fn new(config: BridgeConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let finalizer = DeferredFinalizationQueue::new(scheduler, &config);
        Self {
            registry: HolderRegistry::with_capacity(config.initial_holder_capacity),
            roots: RootTracingDispatcher::new(config.single_zone_check),
            finalizer,
            oom: OomTracker::default(),
            zones_waiting: ZonesWaitingForGc::default(),
            hooks: Box::new(NoHooks),
            native_children: Vec::new(),
            shut_down: false,
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: impl RuntimeHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &HolderRegistry {
        &self.registry
    }

    pub fn add_black_root_source(&mut self, source: Arc<dyn BlackRootSource>) {
        self.roots.add_black_root_source(source);
    }

    /// Register a provider of native children. Providers are asked in
    /// registration order.
    pub fn add_native_children(&mut self, provider: Arc<dyn NativeChildren>) {
        self.native_children.push(provider);
    }

    // Holder registration.

    pub fn add_holder(&mut self, holder: HolderId, tracer: TracerRef, zone: Option<ZoneId>) -> BridgeResult<()> {
        self.registry.add(holder, tracer, zone)
    }

    pub fn add_holder_with_key(&mut self, holder: HolderId, tracer: TracerRef, key: &HolderKey) -> BridgeResult<()> {
        self.registry.add_with_key(holder, tracer, key)
    }

    /// Unregister `holder`, clearing its GC references. A holder that is not
    /// registered yields `None`.
    pub fn remove_holder(&mut self, holder: HolderId) -> Option<TracerRef> {
        self.registry.remove(holder)
    }

    pub fn remove_holder_with_key(&mut self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        self.registry.remove_with_key(holder, key)
    }

    pub fn get_holder(&self, holder: HolderId) -> Option<TracerRef> {
        self.registry.get(holder)
    }

    pub fn get_holder_with_key(&self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        self.registry.get_with_key(holder, key)
    }

    pub fn has_holder(&self, holder: HolderId) -> bool {
        self.registry.has(holder)
    }

    // Root tracing, called by the GC engine.

    pub fn trace_black_roots(&self, tracer: &mut dyn Tracer) {
        self.roots.trace_black_roots(&*self.hooks, tracer);
    }

    /// Trace gray roots within `budget`. Returns whether the pass finished.
    pub fn trace_gray_roots(&mut self, engine: &dyn GcEngine, tracer: &mut dyn Tracer, budget: &mut SliceBudget) -> bool {
        self.roots
            .trace_gray_roots(&mut self.registry, engine, &*self.hooks, tracer, budget)
    }

    pub fn trace_all_gray_roots(&mut self, engine: &dyn GcEngine, tracer: &mut dyn Tracer) {
        self.roots
            .trace_all_gray_roots(&mut self.registry, engine, &*self.hooks, tracer);
    }

    pub fn is_gray_pass_in_progress(&self) -> bool {
        self.roots.cursor().is_in_progress()
    }

    // Cycle collector graph building.

    /// Report native roots, holders that keep gray things alive, and weak
    /// mappings.
    pub fn traverse_roots(&self, engine: &dyn GcEngine, cb: &mut dyn NoteRootCallback) {
        self.hooks.traverse_additional_native_roots(cb);
        traverse_holders(&self.registry, engine, cb);
        weak_maps::note_weak_maps(engine, cb);
    }

    fn graph<'a>(&'a self, engine: &'a dyn GcEngine) -> GraphTraversal<'a> {
        GraphTraversal::new(engine, &self.native_children)
    }

    pub fn traverse_node(&self, engine: &dyn GcEngine, node: CcNode, cb: &mut dyn TraversalCallback) {
        self.graph(engine).traverse_node(node, cb);
    }

    pub fn traverse_gc_thing(
        &self,
        engine: &dyn GcEngine,
        select: TraverseSelect,
        cell: GcCell,
        cb: &mut dyn TraversalCallback,
    ) {
        self.graph(engine).traverse_gc_thing(select, cell, cb);
    }

    pub fn traverse_zone(&self, engine: &dyn GcEngine, zone: ZoneId, cb: &mut dyn TraversalCallback) {
        self.graph(engine).traverse_zone(zone, cb);
    }

    /// Whether the cycle collector should merge zones into single nodes.
    pub fn useful_to_merge_zones(&self, flags: TraversalFlags) -> bool {
        self.config.merge_zones && !flags.contains(TraversalFlags::WANT_ALL_TRACES)
    }

    // Weak maps.

    /// Restore the black-gray invariant for weak mappings. Returns how many
    /// cells were blackened.
    pub fn fix_weak_mapping_gray_bits(&self, engine: &dyn GcEngine) -> BridgeResult<usize> {
        if engine.is_incremental_gc_in_progress() {
            return Err(BridgeError::GcInProgress("weak map gray bit fix-up"));
        }
        Ok(weak_maps::fix_weak_mapping_gray_bits(engine))
    }

    /// Weak mappings that still break the black-gray invariant.
    pub fn check_gray_bits(&self, engine: &dyn GcEngine) -> Vec<WeakMapEntry> {
        weak_maps::check_weak_mapping_gray_bits(engine)
    }

    // Deferred finalization.

    pub fn finalization_queue(&self) -> &DeferredFinalizationQueue {
        &self.finalizer
    }

    pub fn deferred_finalize<G: FinalizeGroup>(&self, item: G::Item) {
        self.finalizer.defer::<G>(item);
    }

    pub fn defer_drop<T: Send + 'static>(&self, thing: T) {
        self.finalizer.defer_drop(thing);
    }

    pub fn finalize_deferred_things(&self, kind: DeferredFinalizeType) {
        self.finalizer.finalize(kind);
    }

    // Lifecycle.

    pub fn on_gc(&mut self, engine: &dyn GcEngine, status: GcStatus, reason: GcReason) {
        match status {
            GcStatus::Begin => {
                tracing::debug!(target: "ccbridge::gc", ?reason, "gc begin");
                self.abandon_stale_pass("gc began during a gray root pass");
                self.hooks.prepare_for_gc();
                self.zones_waiting.prepare(engine, reason);
            }
            GcStatus::End => {
                self.abandon_stale_pass("gc ended during a gray root pass");
                self.oom.recover_after_gc();
                let kind = finalize_type_for_gc_end(engine, reason);
                tracing::debug!(target: "ccbridge::gc", ?reason, finalize = ?kind, "gc end");
                self.finalizer.finalize(kind);
            }
        }
        self.hooks.custom_gc_callback(status);
    }

    /// A gray pass must not span collections. When one does, report it and
    /// drop the parked cursor so the registries accept the next pass.
    fn abandon_stale_pass(&mut self, message: &str) {
        if self.roots.cursor().is_in_progress() {
            report_invariant_violation(message);
            self.roots.abandon_pass(&mut self.registry);
        }
    }

    pub fn on_out_of_memory(&mut self) {
        self.oom.set(OomKind::OutOfMemory, OomState::Reporting);
        self.hooks.custom_out_of_memory_callback();
        self.oom.set(OomKind::OutOfMemory, OomState::Reported);
    }

    pub fn on_large_allocation_failure(&mut self) {
        self.oom.set(OomKind::LargeAllocationFailure, OomState::Reporting);
        self.hooks.custom_large_allocation_failure_callback();
        self.oom.set(OomKind::LargeAllocationFailure, OomState::Reported);
    }

    pub fn set_large_allocation_failure(&mut self, state: OomState) {
        self.oom.set(OomKind::LargeAllocationFailure, state);
    }

    pub fn oom_state(&self, kind: OomKind) -> OomState {
        self.oom.state(kind)
    }

    pub fn add_zone_waiting_for_gc(&mut self, zone: ZoneId) {
        self.zones_waiting.add(zone);
    }

    pub fn on_zone_destroyed(&mut self, zone: ZoneId) {
        self.zones_waiting.remove(zone);
    }

    pub fn zones_waiting_for_gc(&self) -> &ZonesWaitingForGc {
        &self.zones_waiting
    }

    // Maintenance.

    pub fn unmark_skippable_holders(&self) {
        self.registry.unmark_skippable();
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.registry.size_of_excluding_this()
            + self.native_children.capacity() * std::mem::size_of::<Arc<dyn NativeChildren>>()
    }

    /// Fail if `holder` is registered and still reports GC references.
    pub fn assert_no_objects_to_trace(&self, holder: HolderId) {
        let Some(tracer) = self.registry.get(holder) else {
            return;
        };
        let mut count = 0usize;
        tracer.trace(holder, &mut crate::engine::FnTracer::new(|_, _: &str| count += 1));
        if count > 0 {
            tracing::error!(
                target: "ccbridge::holders",
                class = tracer.class_name(),
                count,
                "holder still has GC references"
            );
            report_invariant_violation("holder still has GC references to trace");
        }
    }

    /// Report every remaining root as a leak, then release all deferred
    /// finalization. Later calls do nothing.
    pub fn shutdown(&mut self, engine: &dyn GcEngine) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let mut leaks = LeakReporter::default();
        self.roots.trace_black_roots(&*self.hooks, &mut leaks);
        self.roots.abandon_pass(&mut self.registry);
        self.roots
            .trace_all_gray_roots(&mut self.registry, engine, &*self.hooks, &mut leaks);
        if leaks.leaked > 0 {
            tracing::warn!(
                target: "ccbridge::shutdown",
                leaked = leaks.leaked,
                holders = self.registry.len(),
                "roots leaked at shutdown"
            );
        }

        self.finalizer.finalize(DeferredFinalizeType::Now);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for CollectorContext {
    fn drop(&mut self) {
        if !self.shut_down {
            self.finalizer.finalize(DeferredFinalizeType::Now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalization::ChannelScheduler;
    use crate::test_utils::{MockEngine, RecordingCallback, RecordingTracer, TestHolder};
    use crate::types::{CellColor, TraceKind};
    use parking_lot::Mutex;

    fn context() -> (CollectorContext, Arc<ChannelScheduler>) {
        let scheduler = Arc::new(ChannelScheduler::new());
        (CollectorContext::new(BridgeConfig::default(), scheduler.clone()), scheduler)
    }

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<&'static str>>>);

    impl RuntimeHooks for Log {
        fn trace_additional_gray_roots(&self, _tracer: &mut dyn Tracer) {
            self.0.lock().push("gray");
        }

        fn prepare_for_gc(&self) {
            self.0.lock().push("prepare");
        }

        fn custom_gc_callback(&self, status: GcStatus) {
            self.0.lock().push(match status {
                GcStatus::Begin => "begin",
                GcStatus::End => "end",
            });
        }

        fn custom_out_of_memory_callback(&self) {
            self.0.lock().push("oom");
        }
    }

    #[test]
    fn test_gc_callbacks_run_in_order() {
        let log = Log::default();
        let (ctx, _) = context();
        let mut ctx = ctx.with_hooks(log.clone());
        let engine = MockEngine::new();
        ctx.on_gc(&engine, GcStatus::Begin, GcReason::Api);
        ctx.on_gc(&engine, GcStatus::End, GcReason::Api);
        assert_eq!(*log.0.lock(), vec!["prepare", "begin", "end"]);
        assert_eq!(engine.full_gc_preparations(), 1);
    }

    #[test]
    fn test_oom_reported_then_recovered() {
        let log = Log::default();
        let (ctx, _) = context();
        let mut ctx = ctx.with_hooks(log.clone());
        let engine = MockEngine::new();
        ctx.on_out_of_memory();
        assert_eq!(ctx.oom_state(OomKind::OutOfMemory), OomState::Reported);
        assert_eq!(*log.0.lock(), vec!["oom"]);
        ctx.on_gc(&engine, GcStatus::End, GcReason::LastDitch);
        assert_eq!(ctx.oom_state(OomKind::OutOfMemory), OomState::Recovered);
    }

    #[test]
    fn test_gc_end_finalizes_by_policy() {
        let (mut ctx, scheduler) = context();
        let engine = MockEngine::new();
        ctx.defer_drop(vec![1u8; 4]);
        engine.set_was_incremental(true);
        ctx.on_gc(&engine, GcStatus::End, GcReason::CcForced);
        assert!(ctx.finalization_queue().has_outstanding_run());
        assert_eq!(scheduler.run_until_idle(), 1);
        assert!(ctx.finalization_queue().is_empty());
    }

    #[test]
    fn test_fix_up_refused_during_incremental_gc() {
        let (ctx, _) = context();
        let engine = MockEngine::new();
        engine.set_incremental_in_progress(true);
        assert_eq!(
            ctx.fix_weak_mapping_gray_bits(&engine),
            Err(BridgeError::GcInProgress("weak map gray bit fix-up"))
        );
        engine.set_incremental_in_progress(false);
        assert_eq!(ctx.fix_weak_mapping_gray_bits(&engine), Ok(0));
    }

    #[test]
    fn test_traverse_roots_reports_participating_holders() {
        let (mut ctx, _) = context();
        let engine = MockEngine::new();
        let gray = engine.add_cell(1, TraceKind::Object, ZoneId(1), CellColor::Gray);
        let black = engine.add_cell(2, TraceKind::Object, ZoneId(1), CellColor::Black);
        let holder = Arc::new(TestHolder::multi_zone("Node"));
        holder.set_edges(HolderId(1), vec![gray]);
        holder.set_edges(HolderId(2), vec![black]);
        ctx.add_holder(HolderId(1), holder.clone(), None).unwrap();
        ctx.add_holder(HolderId(2), holder, None).unwrap();

        let mut cb = RecordingCallback::new(TraversalFlags::empty());
        ctx.traverse_roots(&engine, &mut cb);
        assert_eq!(cb.native_roots(), vec![HolderId(1)]);

        let mut all = RecordingCallback::new(TraversalFlags::WANT_ALL_TRACES);
        ctx.traverse_roots(&engine, &mut all);
        let mut roots = all.native_roots();
        roots.sort_unstable();
        assert_eq!(roots, vec![HolderId(1), HolderId(2)]);
    }

    #[test]
    fn test_shutdown_flushes_and_is_idempotent() {
        let (mut ctx, scheduler) = context();
        let engine = MockEngine::new();
        let holder = Arc::new(TestHolder::multi_zone("Leaky"));
        holder.set_edges(HolderId(1), vec![GcCell::new(1, TraceKind::Object, ZoneId(1))]);
        ctx.add_holder(HolderId(1), holder.clone(), None).unwrap();
        ctx.defer_drop(String::from("late"));

        ctx.shutdown(&engine);
        assert!(ctx.is_shut_down());
        assert!(ctx.finalization_queue().is_empty());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(holder.trace_count(), 1);

        ctx.shutdown(&engine);
        assert_eq!(holder.trace_count(), 1);
    }

    #[test]
    fn test_shutdown_mid_pass_still_traces_everything() {
        let (mut ctx, _) = context();
        let engine = MockEngine::new();
        let holder = Arc::new(TestHolder::multi_zone("h"));
        for i in 0..4 {
            ctx.add_holder(HolderId(i), holder.clone(), None).unwrap();
        }
        let mut tracer = RecordingTracer::marking();
        assert!(!ctx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::work(1)));
        assert!(ctx.is_gray_pass_in_progress());
        holder.reset();

        ctx.shutdown(&engine);
        assert_eq!(holder.trace_count(), 4);
        assert!(!ctx.is_gray_pass_in_progress());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "gc began during a gray root pass"))]
    fn test_gc_begin_mid_pass_drops_the_cursor() {
        let (mut ctx, _) = context();
        let engine = MockEngine::new();
        let holder = Arc::new(TestHolder::multi_zone("h"));
        for i in 0..3 {
            ctx.add_holder(HolderId(i), holder.clone(), None).unwrap();
        }
        let mut tracer = RecordingTracer::marking();
        assert!(!ctx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::work(1)));

        ctx.on_gc(&engine, GcStatus::Begin, GcReason::Api);
        assert!(!ctx.is_gray_pass_in_progress());

        holder.reset();
        ctx.remove_holder(HolderId(0));
        assert!(ctx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::unlimited()));
        assert_eq!(holder.trace_count(), 2);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "still has GC references")]
    fn test_assert_no_objects_to_trace() {
        let (mut ctx, _) = context();
        let holder = Arc::new(TestHolder::multi_zone("h"));
        holder.set_edges(HolderId(1), vec![GcCell::new(1, TraceKind::Object, ZoneId(1))]);
        ctx.add_holder(HolderId(1), holder, None).unwrap();
        ctx.assert_no_objects_to_trace(HolderId(1));
    }

    #[test]
    fn test_destroyed_zone_no_longer_waits() {
        let (mut ctx, _) = context();
        let engine = MockEngine::new();
        ctx.add_zone_waiting_for_gc(ZoneId(4));
        ctx.add_zone_waiting_for_gc(ZoneId(5));
        ctx.on_zone_destroyed(ZoneId(4));
        ctx.on_gc(&engine, GcStatus::Begin, GcReason::Api);
        assert_eq!(engine.prepared_zones(), vec![ZoneId(5)]);
        assert!(ctx.zones_waiting_for_gc().is_empty());
    }
}
