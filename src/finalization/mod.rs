//! Deferred finalization.
//!
//! Native destructors cannot run inside the GC's own callbacks, so
//! finalizations are collected into groups and released later, either all at
//! once or in time-bounded slices requeued through a [`Scheduler`].

pub mod group;
pub mod scheduler;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::BridgeConfig;
use crate::error::report_invariant_violation;

pub use group::{DropBatch, FinalizeGroup};
pub use scheduler::{ChannelScheduler, Scheduler};

use group::{group_key, ErasedGroup};

/// How urgently deferred finalization should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredFinalizeType {
    /// Release everything before returning.
    Now,
    /// Release in slices from the scheduler.
    Incrementally,
    /// Do nothing now; an outstanding task or the scheduler handles it.
    Later,
}

/// Result of one incremental step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Done,
}

/// Groups taken from the table for one release run.
struct PendingRun {
    groups: Vec<Box<dyn ErasedGroup>>,
    next: usize,
    generation: u64,
}

#[derive(Default)]
struct QueueState {
    table: FxHashMap<std::any::TypeId, Box<dyn ErasedGroup>>,
    run: Option<PendingRun>,
    releasing: bool,
    generation: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    scheduler: Arc<dyn Scheduler>,
    slice: Duration,
    items_per_check: u32,
    idle_timeout: Duration,
    deferred: AtomicUsize,
    groups_finished: AtomicUsize,
    slices: AtomicUsize,
}

/// Statistics for a [`DeferredFinalizationQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationStats {
    pub total_deferred: usize,
    pub groups_finished: usize,
    pub incremental_slices: usize,
    pub pending_groups: usize,
    pub run_outstanding: bool,
}

/// Queue of deferred finalizations, grouped by release routine.
#[derive(Clone)]
pub struct DeferredFinalizationQueue {
    shared: Arc<Shared>,
}

impl DeferredFinalizationQueue {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: &BridgeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                scheduler,
                slice: config.finalize_slice,
                items_per_check: config.finalize_items_per_check.max(1),
                idle_timeout: config.idle_dispatch_timeout,
                deferred: AtomicUsize::new(0),
                groups_finished: AtomicUsize::new(0),
                slices: AtomicUsize::new(0),
            }),
        }
    }

    /// Add `item` to the group of type `G`, creating the group if needed.
    pub fn defer<G: FinalizeGroup>(&self, item: G::Item) {
        let mut state = self.shared.state.lock();
        let group = state
            .table
            .entry(group_key::<G>())
            .or_insert_with(|| Box::new(G::default()) as Box<dyn ErasedGroup>);
        match group.as_any_mut().downcast_mut::<G>() {
            Some(group) => group.append(item),
            None => report_invariant_violation("finalize group stored under another type"),
        }
        drop(state);
        self.shared.deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Defer dropping `thing`.
    pub fn defer_drop<T: Send + 'static>(&self, thing: T) {
        self.defer::<DropBatch<T>>(thing);
    }

    /// Release deferred finalizations according to `kind`.
    ///
    /// A run left over from a previous call is finished first, unless `kind`
    /// is [`DeferredFinalizeType::Later`]. Calling this from inside a
    /// finalizer only logs a warning.
    pub fn finalize(&self, kind: DeferredFinalizeType) {
        if self.has_outstanding_run() {
            if kind == DeferredFinalizeType::Later {
                return;
            }
            self.shared.release_now(false);
            if self.has_outstanding_run() {
                // Re-entered from a finalizer; the outer release continues.
                return;
            }
        }

        let generation = {
            let mut state = self.shared.state.lock();
            if state.table.is_empty() {
                return;
            }
            let groups: Vec<_> = state.table.drain().map(|(_, group)| group).collect();
            state.generation += 1;
            let generation = state.generation;
            tracing::debug!(
                target: "ccbridge::finalization",
                groups = groups.len(),
                ?kind,
                "starting deferred finalization"
            );
            state.run = Some(PendingRun {
                groups,
                next: 0,
                generation,
            });
            generation
        };

        if kind == DeferredFinalizeType::Now {
            self.shared.release_now(false);
            return;
        }

        let task = FinalizeTask {
            shared: Arc::downgrade(&self.shared),
            generation,
        };
        if let Err(error) = self
            .shared
            .scheduler
            .dispatch_idle(task, self.shared.idle_timeout)
        {
            tracing::warn!(target: "ccbridge::finalization", %error, "finalizing synchronously");
            self.shared.release_now(false);
        }
    }

    pub fn has_outstanding_run(&self) -> bool {
        self.shared.state.lock().run.is_some()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.table.is_empty() && state.run.is_none()
    }

    pub fn get_stats(&self) -> FinalizationStats {
        let state = self.shared.state.lock();
        let pending_groups = state.table.len()
            + state
                .run
                .as_ref()
                .map_or(0, |run| run.groups.len().saturating_sub(run.next));
        let run_outstanding = state.run.is_some();
        drop(state);

        FinalizationStats {
            total_deferred: self.shared.deferred.load(Ordering::Relaxed),
            groups_finished: self.shared.groups_finished.load(Ordering::Relaxed),
            incremental_slices: self.shared.slices.load(Ordering::Relaxed),
            pending_groups,
            run_outstanding,
        }
    }
}

impl Shared {
    /// Run the outstanding groups. A limited release stops once the time
    /// slice is used up, reading the clock every `items_per_check` items.
    fn release_now(&self, limited: bool) {
        let mut release = {
            let mut state = self.state.lock();
            if state.releasing {
                tracing::warn!(target: "ccbridge::finalization", "re-entered deferred finalization");
                return;
            }
            let Some(run) = state.run.as_mut() else {
                return;
            };
            let release = Release {
                state: &self.state,
                groups: std::mem::take(&mut run.groups),
                next: run.next,
            };
            state.releasing = true;
            release
        };

        let started = Instant::now();
        if limited {
            self.slices.fetch_add(1, Ordering::Relaxed);
        }

        while release.next < release.groups.len() {
            let group = &mut release.groups[release.next];
            if limited {
                let mut done = false;
                let mut timed_out = false;
                while !timed_out && !done {
                    done = group.release_slice(self.items_per_check);
                    timed_out = started.elapsed() >= self.slice;
                }
                if done {
                    release.next += 1;
                    self.groups_finished.fetch_add(1, Ordering::Relaxed);
                }
                if timed_out {
                    break;
                }
            } else {
                while !group.release_slice(u32::MAX) {}
                release.next += 1;
                self.groups_finished.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Groups taken out of the run while they are released. Dropping it hands
/// the unfinished groups back and clears the releasing flag, also when a
/// finalizer panics. The group that panicked is abandoned so later drains
/// still make progress.
struct Release<'a> {
    state: &'a Mutex<QueueState>,
    groups: Vec<Box<dyn ErasedGroup>>,
    next: usize,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && self.next < self.groups.len() {
            tracing::error!(
                target: "ccbridge::finalization",
                remaining = self.groups[self.next].len(),
                "finalizer panicked; abandoning its group"
            );
            self.next += 1;
        }

        let mut state = self.state.lock();
        state.releasing = false;
        if self.next >= self.groups.len() {
            state.run = None;
        } else if let Some(run) = state.run.as_mut() {
            run.groups = std::mem::take(&mut self.groups);
            run.next = self.next;
        }
    }
}

/// One incremental finalization step, handed to a [`Scheduler`].
pub struct FinalizeTask {
    shared: Weak<Shared>,
    generation: u64,
}

impl FinalizeTask {
    /// Release one time slice. Does not requeue.
    pub fn step(&self) -> Progress {
        let Some(shared) = self.shared.upgrade() else {
            return Progress::Done;
        };
        if !self.is_current(&shared) {
            // Already finished synchronously.
            return Progress::Done;
        }
        shared.release_now(true);
        if self.is_current(&shared) {
            Progress::Continue
        } else {
            Progress::Done
        }
    }

    /// Release one time slice and requeue the task if work remains. If the
    /// scheduler refuses, everything left is released now.
    pub fn run(self) {
        if self.step() == Progress::Done {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let scheduler = Arc::clone(&shared.scheduler);
        let timeout = shared.idle_timeout;
        drop(shared);
        let weak = self.shared.clone();
        if let Err(error) = scheduler.dispatch_idle(self, timeout) {
            tracing::warn!(target: "ccbridge::finalization", %error, "finalizing synchronously");
            if let Some(shared) = weak.upgrade() {
                shared.release_now(false);
            }
        }
    }

    fn is_current(&self, shared: &Shared) -> bool {
        shared
            .state
            .lock()
            .run
            .as_ref()
            .is_some_and(|run| run.generation == self.generation)
    }
}
