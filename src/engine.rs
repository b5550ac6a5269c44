//! Contracts the tracing GC engine implements for the bridge.
//!
//! The engine owns cells, mark bits, zones and weak maps. The bridge only
//! asks questions and walks edges through these traits. Every method takes
//! `&self`; an engine that needs mutation uses interior mutability and must
//! not hold its own locks while calling back into a visitor.

use crate::types::{CellColor, GcCell, NativeRef, ZoneId};

/// Visitor over GC edges.
pub trait Tracer {
    /// Called once per traced edge. `name` is a static description of the
    /// edge for heap dumps.
    fn on_edge(&mut self, cell: GcCell, name: &str);

    /// Whether this tracer is the engine's gray marker. Gray marking lets the
    /// registry skip zones that are not being collected.
    fn is_marking_tracer(&self) -> bool {
        false
    }
}

/// Adapter turning a closure into a [`Tracer`].
pub struct FnTracer<F> {
    f: F,
    marking: bool,
}

impl<F: FnMut(GcCell, &str)> FnTracer<F> {
    pub fn new(f: F) -> Self {
        Self { f, marking: false }
    }

    pub fn marking(f: F) -> Self {
        Self { f, marking: true }
    }
}

impl<F: FnMut(GcCell, &str)> Tracer for FnTracer<F> {
    fn on_edge(&mut self, cell: GcCell, name: &str) {
        (self.f)(cell, name)
    }

    fn is_marking_tracer(&self) -> bool {
        self.marking
    }
}

/// One live weak mapping. `key` is `None` for weak maps whose keys the
/// engine does not expose as cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakMapEntry {
    pub map: GcCell,
    pub key: Option<GcCell>,
    pub value: GcCell,
}

/// Name of the native participant that knows how to traverse a native
/// child. `None` at a call site means the cycle collector discovers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Participant(pub &'static str);

/// What an object's native private storage holds, in the order the bridge
/// looks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeSlot {
    Empty,
    /// Reserved slot holding a reference-counted object that exposes its own
    /// participant.
    Supports(NativeRef),
    /// Reflector for a native object of a known class.
    Reflector {
        native: NativeRef,
        participant: Participant,
    },
    /// Cross-process proxy whose handler owns a native object.
    RemoteProxy(NativeRef),
    /// Private value attached to a script or module.
    ScriptPrivate(NativeRef),
}

/// Descriptive data used when the cycle collector asks for debug names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectDescription {
    pub class_name: String,
    /// Display name when the object is a function; `Some("")` for anonymous
    /// functions.
    pub function_name: Option<String>,
}

/// Phase reported to the GC callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStatus {
    Begin,
    End,
}

/// Why a collection was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcReason {
    // Reasons raised by the engine itself.
    AllocTrigger,
    TooMuchMalloc,
    LastDitch,
    DestroyRuntime,
    Compartment,
    // Reasons raised by the embedding.
    Api,
    CcForced,
    PageHide,
    ShutdownCc,
    XpconnectShutdown,
    FullGcTimer,
}

impl GcReason {
    /// Internal reasons are collections the engine started on its own, in
    /// the middle of arbitrary code.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            GcReason::AllocTrigger
                | GcReason::TooMuchMalloc
                | GcReason::LastDitch
                | GcReason::DestroyRuntime
                | GcReason::Compartment
        )
    }
}

/// The tracing GC engine as seen from the bridge.
pub trait GcEngine {
    fn color(&self, cell: GcCell) -> CellColor;

    fn is_gray(&self, cell: GcCell) -> bool {
        self.color(cell).is_gray()
    }

    /// Whether the zone's gray roots are needed by the current collection.
    fn needs_gray_roots_for_zone(&self, zone: ZoneId) -> bool;

    fn atoms_zone_is_collecting(&self) -> bool;

    /// Walk the direct GC children of `cell`.
    fn trace_children(&self, cell: GcCell, visit: &mut dyn FnMut(GcCell, &str));

    /// Walk the children of a shape that matter to the cycle collector.
    /// Shapes form long chains, so engines may collapse them here.
    fn trace_shape_cycle_collector_children(
        &self,
        shape: GcCell,
        visit: &mut dyn FnMut(GcCell, &str),
    ) {
        self.trace_children(shape, visit)
    }

    /// Snapshot of all live weak mappings.
    fn weak_map_entries(&self) -> Vec<WeakMapEntry>;

    /// The object a wrapper forwards to, if `key` is a wrapper.
    fn unwrap_delegate(&self, key: GcCell) -> Option<GcCell>;

    /// Turn `cell` and everything gray reachable from it black. Returns
    /// whether anything changed color.
    fn unmark_gray_recursively(&self, cell: GcCell) -> bool;

    /// Walk the gray targets of the zone's cross-zone wrappers.
    fn trace_gray_wrapper_targets(&self, zone: ZoneId, visit: &mut dyn FnMut(GcCell));

    /// Visit every gray object-kind cell allocated in `zone`.
    fn for_each_gray_object(&self, zone: ZoneId, visit: &mut dyn FnMut(GcCell));

    fn native_slot(&self, object: GcCell) -> NativeSlot;

    fn describe_object(&self, object: GcCell) -> ObjectDescription;

    fn is_incremental_gc_in_progress(&self) -> bool;

    /// Whether the collection that just ended ran incrementally.
    fn was_incremental_gc(&self) -> bool;

    fn is_exception_pending(&self) -> bool;

    fn prepare_for_full_gc(&self);

    fn prepare_zone_for_gc(&self, zone: ZoneId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TraceKind, ZoneId};

    #[test]
    fn test_fn_tracer_collects_edges() {
        let mut seen = Vec::new();
        let mut tracer = FnTracer::new(|cell: GcCell, name: &str| seen.push((cell.id.0, name.to_string())));
        tracer.on_edge(GcCell::new(4, TraceKind::Object, ZoneId(1)), "slot");
        assert!(!tracer.is_marking_tracer());
        drop(tracer);
        assert_eq!(seen, vec![(4, "slot".to_string())]);
    }

    #[test]
    fn test_internal_reasons() {
        assert!(GcReason::DestroyRuntime.is_internal());
        assert!(GcReason::AllocTrigger.is_internal());
        assert!(!GcReason::ShutdownCc.is_internal());
        assert!(!GcReason::Api.is_internal());
    }
}
