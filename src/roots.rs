//! Root tracing entry points called by the GC engine.
//!
//! Black roots are traced in full every collection. Gray roots come from
//! the holder registries and are traced incrementally: the pass yields when
//! its slice budget runs out and resumes from the parked cursor on the next
//! call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::budget::SliceBudget;
use crate::config::SingleZoneCheck;
use crate::context::RuntimeHooks;
use crate::engine::{GcEngine, Tracer};
use crate::error::report_invariant_violation;
use crate::holders::{
    CursorEntry, HolderCursor, HolderRegistry, IterationCursor, ListCursor, MapCursor, WhichHolders,
};
use crate::types::{GcCell, ZoneId};

/// Roots that are always alive, such as pending microtasks.
pub trait BlackRootSource {
    fn name(&self) -> &'static str;

    fn trace(&self, tracer: &mut dyn Tracer);
}

/// Decides when single-zone holders are validated.
#[derive(Debug)]
struct ZoneCheckSchedule {
    mode: SingleZoneCheck,
    passes: u64,
}

impl ZoneCheckSchedule {
    /// Called once per single-zone holder visited.
    fn should_check(&mut self) -> bool {
        self.passes = self.passes.wrapping_add(1);
        match self.mode {
            SingleZoneCheck::Always => true,
            SingleZoneCheck::Never => false,
            SingleZoneCheck::EveryNth(n) => self.passes % u64::from(n.max(1)) == 0,
        }
    }
}

/// Fails when a holder declared single-zone points into a second zone.
/// The atoms zone is shared and always allowed.
struct ZoneCheckTracer {
    class_name: &'static str,
    zone: Option<ZoneId>,
}

impl Tracer for ZoneCheckTracer {
    fn on_edge(&mut self, cell: GcCell, name: &str) {
        if cell.zone.is_atoms() {
            return;
        }
        match self.zone {
            None => self.zone = Some(cell.zone),
            Some(zone) if zone == cell.zone => {}
            Some(zone) => {
                tracing::error!(
                    target: "ccbridge::roots",
                    class = self.class_name,
                    edge = name,
                    expected = %zone,
                    found = %cell.zone,
                    "single-zone holder points into another zone"
                );
                report_invariant_violation("single-zone holder contains pointers into more than one zone");
            }
        }
    }
}

fn check_holder_is_single_zone(entry: &CursorEntry) {
    let mut checker = ZoneCheckTracer {
        class_name: entry.tracer.class_name(),
        zone: entry.zone,
    };
    entry.tracer.trace(entry.holder, &mut checker);
}

/// Trace holders under `cursor` until it is done or the budget runs out.
/// Returns whether the cursor is done.
fn trace_holders<C: HolderCursor>(
    cursor: &mut C,
    store: &mut C::Store,
    tracer: &mut dyn Tracer,
    budget: &mut SliceBudget,
    zone_checks: &mut ZoneCheckSchedule,
) -> bool {
    while !cursor.is_done() && !budget.is_over_budget() {
        let Some(entry) = cursor.entry(store) else {
            break;
        };
        if entry.tracer.is_single_zone() && zone_checks.should_check() {
            check_holder_is_single_zone(&entry);
        }
        entry.tracer.trace(entry.holder, tracer);
        cursor.advance(store);
        budget.step();
    }
    cursor.is_done()
}

/// Owner of the gray-root cursor and the black root sources.
pub struct RootTracingDispatcher {
    cursor: IterationCursor,
    black_roots: Vec<Arc<dyn BlackRootSource>>,
    zone_checks: ZoneCheckSchedule,
}

impl RootTracingDispatcher {
    pub fn new(single_zone_check: SingleZoneCheck) -> Self {
        Self {
            cursor: IterationCursor::NotStarted,
            black_roots: Vec::new(),
            zone_checks: ZoneCheckSchedule {
                mode: single_zone_check,
                passes: 0,
            },
        }
    }

    pub fn add_black_root_source(&mut self, source: Arc<dyn BlackRootSource>) {
        self.black_roots.push(source);
    }

    pub fn cursor(&self) -> &IterationCursor {
        &self.cursor
    }

    pub fn is_idle(&self) -> bool {
        self.cursor.is_not_started()
    }

    /// Drop a gray pass that will never be resumed.
    pub fn abandon_pass(&mut self, registry: &mut HolderRegistry) {
        match std::mem::take(&mut self.cursor) {
            IterationCursor::Registry(cursor) => cursor.finish(&mut registry.map),
            IterationCursor::List(cursor) => cursor.finish(&mut registry.list),
            IterationCursor::NotStarted | IterationCursor::Done => return,
        }
        tracing::debug!(target: "ccbridge::roots", "abandoned gray root pass");
    }

    /// Trace every black root.
    ///
    /// A panic here means the runtime is corrupt; the process aborts instead
    /// of unwinding into the GC.
    pub fn trace_black_roots(&self, hooks: &dyn RuntimeHooks, tracer: &mut dyn Tracer) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            hooks.trace_additional_black_roots(&mut *tracer);
            for source in &self.black_roots {
                source.trace(&mut *tracer);
            }
        }));
        if result.is_err() {
            tracing::error!(target: "ccbridge::roots", "panic while tracing black roots");
            std::process::abort();
        }
    }

    /// Trace gray roots within `budget`. Returns `true` once every holder has
    /// been traced; `false` means call again to continue.
    pub fn trace_gray_roots(
        &mut self,
        registry: &mut HolderRegistry,
        engine: &dyn GcEngine,
        hooks: &dyn RuntimeHooks,
        tracer: &mut dyn Tracer,
        budget: &mut SliceBudget,
    ) -> bool {
        // Gray marking may skip zones that are not collecting, but only when
        // the atoms zone is not collecting: every holder can point there.
        let which = if tracer.is_marking_tracer() && !engine.atoms_zone_is_collecting() {
            WhichHolders::RequiredForGrayMarking
        } else {
            WhichHolders::All
        };
        self.trace_native_gray_roots(registry, engine, hooks, tracer, which, budget)
    }

    /// Trace every gray root in one go. Must not be called mid-pass.
    pub fn trace_all_gray_roots(
        &mut self,
        registry: &mut HolderRegistry,
        engine: &dyn GcEngine,
        hooks: &dyn RuntimeHooks,
        tracer: &mut dyn Tracer,
    ) {
        assert!(self.cursor.is_not_started(), "gray root pass already in progress");
        let mut budget = SliceBudget::unlimited();
        let finished =
            self.trace_native_gray_roots(registry, engine, hooks, tracer, WhichHolders::All, &mut budget);
        debug_assert!(finished);
    }

    fn trace_native_gray_roots(
        &mut self,
        registry: &mut HolderRegistry,
        engine: &dyn GcEngine,
        hooks: &dyn RuntimeHooks,
        tracer: &mut dyn Tracer,
        which: WhichHolders,
        budget: &mut SliceBudget,
    ) -> bool {
        let mut state = std::mem::take(&mut self.cursor);

        // Holders may have been removed between slices.
        match &mut state {
            IterationCursor::Registry(cursor) => cursor.settle(&mut registry.map),
            IterationCursor::List(cursor) => cursor.settle(&mut registry.list),
            IterationCursor::NotStarted | IterationCursor::Done => {}
        }

        loop {
            state = match state {
                IterationCursor::NotStarted => {
                    hooks.trace_additional_gray_roots(&mut *tracer);
                    let cursor = MapCursor::begin(&mut registry.map, which, |zone| {
                        engine.needs_gray_roots_for_zone(zone)
                    });
                    budget.force_check();
                    IterationCursor::Registry(cursor)
                }
                IterationCursor::Registry(mut cursor) => {
                    if !trace_holders(&mut cursor, &mut registry.map, tracer, budget, &mut self.zone_checks) {
                        tracing::trace!(target: "ccbridge::roots", zone = ?cursor.current_zone(), "gray root slice yielded");
                        self.cursor = IterationCursor::Registry(cursor);
                        return false;
                    }
                    cursor.finish(&mut registry.map);
                    IterationCursor::List(ListCursor::begin(&mut registry.list))
                }
                IterationCursor::List(mut cursor) => {
                    if !trace_holders(&mut cursor, &mut registry.list, tracer, budget, &mut self.zone_checks) {
                        tracing::trace!(target: "ccbridge::roots", "gray root slice yielded in keyed holders");
                        self.cursor = IterationCursor::List(cursor);
                        return false;
                    }
                    cursor.finish(&mut registry.list);
                    IterationCursor::Done
                }
                IterationCursor::Done => {
                    tracing::debug!(target: "ccbridge::roots", holders = registry.len(), "gray roots traced");
                    self.cursor = IterationCursor::NotStarted;
                    return true;
                }
            };
        }
    }
}
