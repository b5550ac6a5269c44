//! Deferred finalization driven through GC end callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ccbridge::test_utils::MockEngine;
use ccbridge::{
    BridgeConfig, BridgeResult, ChannelScheduler, CollectorContext, DeferredFinalizeType, FinalizeTask, GcReason,
    GcStatus, Progress, Scheduler,
};

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracked(count: usize, dropped: &Arc<AtomicUsize>, cx: &CollectorContext) {
    for _ in 0..count {
        cx.defer_drop(Tracked(dropped.clone()));
    }
}

#[test]
fn incremental_gc_end_drains_through_scheduler() {
    let scheduler = Arc::new(ChannelScheduler::new());
    let config = BridgeConfig::default().with_finalize_slice(Duration::ZERO, 50);
    let mut cx = CollectorContext::new(config, scheduler.clone());
    let engine = MockEngine::new();
    engine.set_was_incremental(true);

    let dropped = Arc::new(AtomicUsize::new(0));
    tracked(120, &dropped, &cx);
    cx.on_gc(&engine, GcStatus::End, GcReason::FullGcTimer);
    assert_eq!(dropped.load(Ordering::SeqCst), 0);

    assert_eq!(scheduler.run_until_idle(), 3);
    assert_eq!(dropped.load(Ordering::SeqCst), 120);
    assert!(cx.finalization_queue().is_empty());
}

#[test]
fn internal_gc_end_leaves_finalization_to_the_event_loop() {
    let scheduler = Arc::new(ChannelScheduler::new());
    let mut cx = CollectorContext::new(BridgeConfig::default(), scheduler.clone());
    let engine = MockEngine::new();

    let dropped = Arc::new(AtomicUsize::new(0));
    tracked(10, &dropped, &cx);
    cx.on_gc(&engine, GcStatus::End, GcReason::TooMuchMalloc);
    assert_eq!(dropped.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.pending(), 1);

    // A later non-internal GC finishes the outstanding run synchronously.
    cx.on_gc(&engine, GcStatus::End, GcReason::Api);
    assert_eq!(dropped.load(Ordering::SeqCst), 10);
    assert_eq!(scheduler.run_until_idle(), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 10);
}

#[test]
fn runtime_destruction_finalizes_now() {
    let scheduler = Arc::new(ChannelScheduler::new());
    let mut cx = CollectorContext::new(BridgeConfig::default(), scheduler.clone());
    let engine = MockEngine::new();
    engine.set_was_incremental(true);

    let dropped = Arc::new(AtomicUsize::new(0));
    tracked(5, &dropped, &cx);
    cx.on_gc(&engine, GcStatus::End, GcReason::DestroyRuntime);
    assert_eq!(dropped.load(Ordering::SeqCst), 5);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn dropping_context_flushes_outstanding_run() {
    let scheduler = Arc::new(ChannelScheduler::new());
    let dropped = Arc::new(AtomicUsize::new(0));
    {
        let cx = CollectorContext::new(BridgeConfig::default(), scheduler.clone());
        tracked(3, &dropped, &cx);
        cx.finalize_deferred_things(DeferredFinalizeType::Incrementally);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 3);
    // The queued step outlived its queue and does nothing.
    assert_eq!(scheduler.run_until_idle(), 1);
}

/// Scheduler that keeps tasks so the test can step them by hand.
#[derive(Default)]
struct ManualScheduler {
    tasks: parking_lot::Mutex<Vec<FinalizeTask>>,
}

impl Scheduler for ManualScheduler {
    fn dispatch_idle(&self, task: FinalizeTask, _timeout: Duration) -> BridgeResult<()> {
        self.tasks.lock().push(task);
        Ok(())
    }
}

#[test]
fn manual_stepping_reports_progress() {
    let scheduler = Arc::new(ManualScheduler::default());
    let config = BridgeConfig::default().with_finalize_slice(Duration::ZERO, 4);
    let cx = CollectorContext::new(config, scheduler.clone());
    let dropped = Arc::new(AtomicUsize::new(0));
    tracked(10, &dropped, &cx);
    cx.finalize_deferred_things(DeferredFinalizeType::Incrementally);

    let task = scheduler.tasks.lock().pop().unwrap();
    assert_eq!(task.step(), Progress::Continue);
    assert_eq!(task.step(), Progress::Continue);
    assert_eq!(task.step(), Progress::Done);
    assert_eq!(dropped.load(Ordering::SeqCst), 10);
    assert_eq!(cx.finalization_queue().get_stats().incremental_slices, 3);
}
