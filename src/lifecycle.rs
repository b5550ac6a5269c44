//! GC lifecycle bookkeeping: out-of-memory episodes, zones waiting for the
//! next collection, and the finalization policy chosen when a GC ends.

use rustc_hash::FxHashSet;

use crate::engine::{GcEngine, GcReason};
use crate::finalization::DeferredFinalizeType;
use crate::types::ZoneId;

/// Progress of one out-of-memory episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OomState {
    #[default]
    Ok,
    /// The failure is being reported; custom callbacks are running.
    Reporting,
    /// Reported, and no GC has finished since.
    Reported,
    /// A GC finished after the report.
    Recovered,
}

impl OomState {
    pub fn as_str(self) -> &'static str {
        match self {
            OomState::Ok => "OK",
            OomState::Reporting => "Reporting",
            OomState::Reported => "Reported",
            OomState::Recovered => "Recovered",
        }
    }
}

/// Which allocation failure an [`OomState`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomKind {
    OutOfMemory,
    LargeAllocationFailure,
}

impl OomKind {
    fn as_str(self) -> &'static str {
        match self {
            OomKind::OutOfMemory => "out of memory",
            OomKind::LargeAllocationFailure => "large allocation failure",
        }
    }
}

/// Both out-of-memory state machines.
#[derive(Debug, Default)]
pub struct OomTracker {
    out_of_memory: OomState,
    large_allocation_failure: OomState,
}

impl OomTracker {
    pub fn state(&self, kind: OomKind) -> OomState {
        match kind {
            OomKind::OutOfMemory => self.out_of_memory,
            OomKind::LargeAllocationFailure => self.large_allocation_failure,
        }
    }

    /// Move to `state`, recording the transition once.
    pub fn set(&mut self, kind: OomKind, state: OomState) {
        let slot = match kind {
            OomKind::OutOfMemory => &mut self.out_of_memory,
            OomKind::LargeAllocationFailure => &mut self.large_allocation_failure,
        };
        if *slot == state {
            return;
        }
        tracing::warn!(
            target: "ccbridge::oom",
            kind = kind.as_str(),
            from = slot.as_str(),
            to = state.as_str(),
            "allocation failure state changed"
        );
        *slot = state;
    }

    /// A finished GC recovers every reported episode.
    pub fn recover_after_gc(&mut self) {
        for kind in [OomKind::OutOfMemory, OomKind::LargeAllocationFailure] {
            if self.state(kind) == OomState::Reported {
                self.set(kind, OomState::Recovered);
            }
        }
    }
}

/// Zones scheduled for the next collection.
#[derive(Debug, Default)]
pub struct ZonesWaitingForGc {
    zones: FxHashSet<ZoneId>,
}

impl ZonesWaitingForGc {
    pub fn add(&mut self, zone: ZoneId) {
        self.zones.insert(zone);
    }

    pub fn remove(&mut self, zone: ZoneId) -> bool {
        self.zones.remove(&zone)
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.zones.contains(&zone)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Tell the engine what to collect. With no zones waiting, a collection
    /// the embedding asked for covers every zone; one the engine started on
    /// its own keeps its own selection.
    pub fn prepare(&mut self, engine: &dyn GcEngine, reason: GcReason) {
        if self.zones.is_empty() {
            if !reason.is_internal() {
                engine.prepare_for_full_gc();
            }
            return;
        }
        let mut zones: Vec<ZoneId> = self.zones.drain().collect();
        zones.sort_unstable();
        for zone in zones {
            engine.prepare_zone_for_gc(zone);
        }
    }
}

/// Finalization policy for the end of a collection.
pub fn finalize_type_for_gc_end(engine: &dyn GcEngine, reason: GcReason) -> DeferredFinalizeType {
    if engine.is_exception_pending() {
        // Finalizers cannot run with an exception pending.
        DeferredFinalizeType::Later
    } else if reason.is_internal() {
        if reason == GcReason::DestroyRuntime {
            DeferredFinalizeType::Now
        } else {
            // Possibly inside code that assumes no side effects.
            DeferredFinalizeType::Later
        }
    } else if engine.was_incremental_gc() {
        DeferredFinalizeType::Incrementally
    } else {
        DeferredFinalizeType::Now
    }
}
