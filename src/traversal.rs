//! Feeding GC cells to the cycle collector's node/edge protocol.
//!
//! A gray cell becomes a node whose edges are its gray children of kinds the
//! cycle collector models. Intermediate kinds such as shapes are walked
//! through with an explicit work list, so long metadata chains cannot
//! overflow the stack. Objects also report edges into the native graph.

use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashSet;

use crate::engine::{GcEngine, NativeSlot, Participant};
use crate::holders::HolderRegistry;
use crate::types::{CellId, GcCell, HolderId, NativeRef, TraceKind, ZoneId};

bitflags! {
    /// What the cycle collector wants from a traversal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TraversalFlags: u32 {
        /// Report every node and edge, including black ones. Used for heap
        /// dumps; disables zone merging.
        const WANT_ALL_TRACES = 1 << 0;
        /// Give nodes and edges descriptive names.
        const WANT_DEBUG_INFO = 1 << 1;
    }
}

/// Node/edge sink of the cycle collector during graph building.
pub trait TraversalCallback {
    fn flags(&self) -> TraversalFlags;

    fn want_all_traces(&self) -> bool {
        self.flags().contains(TraversalFlags::WANT_ALL_TRACES)
    }

    fn want_debug_info(&self) -> bool {
        self.flags().contains(TraversalFlags::WANT_DEBUG_INFO)
    }

    fn describe_node(&mut self, marked: bool, name: &str);

    /// Name for the next edge reported. Only called with debug info.
    fn note_edge_name(&mut self, name: &str);

    fn note_edge(&mut self, target: GcCell);

    fn note_native_edge(&mut self, target: NativeRef, participant: Option<Participant>);
}

/// Root sink of the cycle collector.
pub trait NoteRootCallback {
    fn flags(&self) -> TraversalFlags;

    fn want_all_traces(&self) -> bool {
        self.flags().contains(TraversalFlags::WANT_ALL_TRACES)
    }

    fn note_native_root(&mut self, holder: HolderId, participant: Participant);

    /// Report that `value` is alive while `map` and `key` (or the key's
    /// delegate) are. A `None` key means the key is always alive.
    fn note_weak_mapping(
        &mut self,
        map: GcCell,
        key: Option<GcCell>,
        delegate: Option<GcCell>,
        value: Option<GcCell>,
    );
}

/// Class-specific enumeration of an object's native children, consulted
/// before the engine's generic private-slot lookup.
pub trait NativeChildren {
    /// Report the native children of `object`. Returns `false` if this
    /// provider does not handle the object.
    fn note_native_children(
        &self,
        engine: &dyn GcEngine,
        object: GcCell,
        cb: &mut dyn TraversalCallback,
    ) -> bool;

    /// Debug name for `object`, if this provider knows better than the
    /// engine's class name.
    fn describe(&self, _object: GcCell) -> Option<String> {
        None
    }
}

/// How much of a cell to traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseSelect {
    /// GC children and native children.
    Full,
    /// Native children only. Used when the cell's zone is already a merged
    /// node.
    NativeOnly,
}

/// A node the cycle collector can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcNode {
    Cell(GcCell),
    Zone(ZoneId),
}

/// Read-only view used to traverse cells.
pub struct GraphTraversal<'a> {
    engine: &'a dyn GcEngine,
    native_children: &'a [Arc<dyn NativeChildren>],
}

impl<'a> GraphTraversal<'a> {
    pub fn new(engine: &'a dyn GcEngine, native_children: &'a [Arc<dyn NativeChildren>]) -> Self {
        Self {
            engine,
            native_children,
        }
    }

    pub fn traverse_node(&self, node: CcNode, cb: &mut dyn TraversalCallback) {
        match node {
            CcNode::Cell(cell) => self.traverse_gc_thing(TraverseSelect::Full, cell, cb),
            CcNode::Zone(zone) => self.traverse_zone(zone, cb),
        }
    }

    pub fn traverse_gc_thing(&self, select: TraverseSelect, cell: GcCell, cb: &mut dyn TraversalCallback) {
        let is_gray = self.engine.is_gray(cell);

        if select == TraverseSelect::Full {
            self.describe_gc_thing(!is_gray, cell, cb);
        }

        // A marked cell keeps its children alive: JS children are black by the
        // black-gray invariant and native children hold a reference count.
        if !is_gray && !cb.want_all_traces() {
            return;
        }

        if select == TraverseSelect::Full {
            self.note_gc_children(cell, cb);
        }

        if cell.kind.is_object() {
            self.note_native_children(cell, cb);
        }
    }

    /// Report a whole zone as one node.
    ///
    /// Edges inside the zone vanish; edges out of it are found through the
    /// engine's wrapper table. Only objects can own native children, so only
    /// gray objects are scanned for them.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the callback wants all traces: a merged zone
    /// hides black cells, which such a traversal must see.
    pub fn traverse_zone(&self, zone: ZoneId, cb: &mut dyn TraversalCallback) {
        debug_assert!(!cb.want_all_traces(), "zone merging during an all-traces collection");

        cb.describe_node(false, "JS Zone");

        let mut targets = Vec::new();
        self.engine
            .trace_gray_wrapper_targets(zone, &mut |target| targets.push(target));
        let mut walker = ChildWalker::new(self.engine, cb);
        for target in targets {
            walker.visit(target, "wrapper target");
        }
        walker.drain();

        let mut objects = Vec::new();
        self.engine
            .for_each_gray_object(zone, &mut |object| objects.push(object));
        for object in objects {
            self.traverse_gc_thing(TraverseSelect::NativeOnly, object, cb);
        }
    }

    fn describe_gc_thing(&self, marked: bool, cell: GcCell, cb: &mut dyn TraversalCallback) {
        if !cb.want_debug_info() {
            cb.describe_node(marked, "JS Object");
            return;
        }

        let name = if cell.kind.is_object() {
            self.native_children
                .iter()
                .find_map(|provider| provider.describe(cell))
                .unwrap_or_else(|| {
                    let description = self.engine.describe_object(cell);
                    match (cell.kind, description.function_name) {
                        (TraceKind::Function, Some(name)) if !name.is_empty() => {
                            format!("JS Object (Function - {name})")
                        }
                        (TraceKind::Function, _) => "JS Object (Function)".to_string(),
                        _ => format!("JS Object ({})", description.class_name),
                    }
                })
        } else {
            cell.kind.as_str().to_string()
        };
        cb.describe_node(marked, &name);
    }

    fn note_gc_children(&self, cell: GcCell, cb: &mut dyn TraversalCallback) {
        let mut walker = ChildWalker::new(self.engine, cb);
        walker.walk_children_of(cell);
        walker.drain();
    }

    fn note_native_children(&self, object: GcCell, cb: &mut dyn TraversalCallback) {
        for provider in self.native_children {
            if provider.note_native_children(self.engine, object, cb) {
                return;
            }
        }

        let (edge_name, target, participant) = match self.engine.native_slot(object) {
            NativeSlot::Empty => return,
            NativeSlot::Supports(native) => ("reserved slot 0", native, None),
            NativeSlot::Reflector {
                native,
                participant,
            } => ("reflected native", native, Some(participant)),
            NativeSlot::RemoteProxy(native) => ("proxy handler", native, None),
            NativeSlot::ScriptPrivate(native) => ("script private", native, None),
        };
        if cb.want_debug_info() {
            cb.note_edge_name(edge_name);
        }
        cb.note_native_edge(target, participant);
    }
}

/// Walks GC children, reporting cycle-collector kinds as edges and queueing
/// every other non-leaf kind to be walked through.
struct ChildWalker<'a, 'cb> {
    engine: &'a dyn GcEngine,
    cb: &'cb mut dyn TraversalCallback,
    want_all: bool,
    want_debug: bool,
    pending: Vec<GcCell>,
    seen: FxHashSet<CellId>,
}

impl<'a, 'cb> ChildWalker<'a, 'cb> {
    fn new(engine: &'a dyn GcEngine, cb: &'cb mut dyn TraversalCallback) -> Self {
        let want_all = cb.want_all_traces();
        let want_debug = cb.want_debug_info();
        Self {
            engine,
            cb,
            want_all,
            want_debug,
            pending: Vec::new(),
            seen: FxHashSet::default(),
        }
    }

    fn visit(&mut self, child: GcCell, name: &str) {
        // Gray checks on strings and symbols are slow and they never matter.
        if child.kind.is_leaf() {
            return;
        }
        if !self.want_all && !self.engine.is_gray(child) {
            return;
        }
        if child.is_cc_kind() {
            if self.want_debug {
                self.cb.note_edge_name(name);
            }
            self.cb.note_edge(child);
            return;
        }
        if self.seen.insert(child.id) {
            self.pending.push(child);
        }
    }

    fn walk_children_of(&mut self, cell: GcCell) {
        let mut found = Vec::new();
        let mut collect = |child: GcCell, name: &str| found.push((child, name.to_string()));
        if cell.kind == TraceKind::Shape {
            self.engine.trace_shape_cycle_collector_children(cell, &mut collect);
        } else {
            self.engine.trace_children(cell, &mut collect);
        }
        for (child, name) in found {
            self.visit(child, &name);
        }
    }

    fn drain(&mut self) {
        while let Some(next) = self.pending.pop() {
            self.walk_children_of(next);
        }
    }
}

/// Report every holder that keeps something gray alive as a native root.
pub fn traverse_holders(registry: &HolderRegistry, engine: &dyn GcEngine, cb: &mut dyn NoteRootCallback) {
    let want_all = cb.want_all_traces();
    registry.for_each_live(|holder, tracer| {
        if want_all || tracer.participates_in_collection(holder, engine) {
            cb.note_native_root(holder, tracer.participant());
        }
    });
}
