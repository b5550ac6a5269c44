//! Test fixtures shared by unit tests, integration tests and benches.
//!
//! [`MockEngine`] is a deterministic in-memory GC engine: cells, colors,
//! edges, weak maps and wrapper tables are all set up by hand. It never holds
//! its lock while calling back into a visitor, so visitors may query it.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::{GcEngine, NativeSlot, ObjectDescription, Participant, Tracer, WeakMapEntry};
use crate::holders::HolderTracer;
use crate::traversal::{NoteRootCallback, TraversalCallback, TraversalFlags};
use crate::types::{CellColor, CellId, GcCell, HolderId, NativeRef, TraceKind, ZoneId};

#[derive(Default)]
struct MockState {
    cells: Vec<GcCell>,
    colors: FxHashMap<CellId, CellColor>,
    edges: FxHashMap<CellId, Vec<GcCell>>,
    weak_maps: Vec<WeakMapEntry>,
    delegates: FxHashMap<CellId, GcCell>,
    wrapper_targets: FxHashMap<ZoneId, Vec<GcCell>>,
    native_slots: FxHashMap<CellId, NativeSlot>,
    descriptions: FxHashMap<CellId, ObjectDescription>,
    /// `None` means every zone is collecting.
    collecting: Option<FxHashSet<ZoneId>>,
    atoms_collecting: bool,
    incremental_in_progress: bool,
    was_incremental: bool,
    exception_pending: bool,
    full_gc_preparations: usize,
    prepared_zones: Vec<ZoneId>,
}

/// In-memory GC engine for tests. Cells that were never added are black.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell(&self, id: u64, kind: TraceKind, zone: ZoneId, color: CellColor) -> GcCell {
        let cell = GcCell::new(id, kind, zone);
        let mut state = self.state.lock();
        state.cells.push(cell);
        state.colors.insert(cell.id, color);
        cell
    }

    pub fn set_color(&self, cell: GcCell, color: CellColor) {
        self.state.lock().colors.insert(cell.id, color);
    }

    pub fn add_edge(&self, from: GcCell, to: GcCell) {
        self.state.lock().edges.entry(from.id).or_default().push(to);
    }

    pub fn add_weak_mapping(&self, map: GcCell, key: Option<GcCell>, value: GcCell) {
        self.state.lock().weak_maps.push(WeakMapEntry { map, key, value });
    }

    pub fn set_delegate(&self, key: GcCell, target: GcCell) {
        self.state.lock().delegates.insert(key.id, target);
    }

    pub fn add_wrapper_target(&self, zone: ZoneId, target: GcCell) {
        self.state.lock().wrapper_targets.entry(zone).or_default().push(target);
    }

    pub fn set_native_slot(&self, object: GcCell, slot: NativeSlot) {
        self.state.lock().native_slots.insert(object.id, slot);
    }

    pub fn set_description(&self, object: GcCell, description: ObjectDescription) {
        self.state.lock().descriptions.insert(object.id, description);
    }

    /// Limit the current collection to `zones`.
    pub fn set_collecting_zones(&self, zones: &[ZoneId]) {
        self.state.lock().collecting = Some(zones.iter().copied().collect());
    }

    pub fn collect_all_zones(&self) {
        self.state.lock().collecting = None;
    }

    pub fn set_atoms_collecting(&self, collecting: bool) {
        self.state.lock().atoms_collecting = collecting;
    }

    pub fn set_incremental_in_progress(&self, in_progress: bool) {
        self.state.lock().incremental_in_progress = in_progress;
    }

    pub fn set_was_incremental(&self, was: bool) {
        self.state.lock().was_incremental = was;
    }

    pub fn set_exception_pending(&self, pending: bool) {
        self.state.lock().exception_pending = pending;
    }

    pub fn full_gc_preparations(&self) -> usize {
        self.state.lock().full_gc_preparations
    }

    pub fn prepared_zones(&self) -> Vec<ZoneId> {
        self.state.lock().prepared_zones.clone()
    }

    pub fn gray_cells(&self) -> Vec<GcCell> {
        let state = self.state.lock();
        state
            .cells
            .iter()
            .copied()
            .filter(|cell| state.colors.get(&cell.id).is_some_and(|c| c.is_gray()))
            .collect()
    }

    fn children_of(&self, cell: GcCell) -> Vec<GcCell> {
        self.state.lock().edges.get(&cell.id).cloned().unwrap_or_default()
    }
}

impl GcEngine for MockEngine {
    fn color(&self, cell: GcCell) -> CellColor {
        self.state
            .lock()
            .colors
            .get(&cell.id)
            .copied()
            .unwrap_or(CellColor::Black)
    }

    fn needs_gray_roots_for_zone(&self, zone: ZoneId) -> bool {
        self.state
            .lock()
            .collecting
            .as_ref()
            .map_or(true, |zones| zones.contains(&zone))
    }

    fn atoms_zone_is_collecting(&self) -> bool {
        self.state.lock().atoms_collecting
    }

    fn trace_children(&self, cell: GcCell, visit: &mut dyn FnMut(GcCell, &str)) {
        for child in self.children_of(cell) {
            visit(child, "edge");
        }
    }

    fn weak_map_entries(&self) -> Vec<WeakMapEntry> {
        self.state.lock().weak_maps.clone()
    }

    fn unwrap_delegate(&self, key: GcCell) -> Option<GcCell> {
        self.state.lock().delegates.get(&key.id).copied()
    }

    fn unmark_gray_recursively(&self, cell: GcCell) -> bool {
        let mut state = self.state.lock();
        let mut changed = false;
        let mut pending = vec![cell];
        while let Some(next) = pending.pop() {
            if !state.colors.get(&next.id).is_some_and(|c| c.is_gray()) {
                continue;
            }
            state.colors.insert(next.id, CellColor::Black);
            changed = true;
            if let Some(children) = state.edges.get(&next.id) {
                pending.extend(children.iter().copied());
            }
        }
        changed
    }

    fn trace_gray_wrapper_targets(&self, zone: ZoneId, visit: &mut dyn FnMut(GcCell)) {
        let targets = self
            .state
            .lock()
            .wrapper_targets
            .get(&zone)
            .cloned()
            .unwrap_or_default();
        for target in targets {
            if self.is_gray(target) {
                visit(target);
            }
        }
    }

    fn for_each_gray_object(&self, zone: ZoneId, visit: &mut dyn FnMut(GcCell)) {
        let objects: Vec<GcCell> = self
            .gray_cells()
            .into_iter()
            .filter(|cell| cell.zone == zone && cell.kind.is_object())
            .collect();
        for object in objects {
            visit(object);
        }
    }

    fn native_slot(&self, object: GcCell) -> NativeSlot {
        self.state
            .lock()
            .native_slots
            .get(&object.id)
            .copied()
            .unwrap_or(NativeSlot::Empty)
    }

    fn describe_object(&self, object: GcCell) -> ObjectDescription {
        self.state
            .lock()
            .descriptions
            .get(&object.id)
            .cloned()
            .unwrap_or_else(|| ObjectDescription {
                class_name: "Object".into(),
                function_name: None,
            })
    }

    fn is_incremental_gc_in_progress(&self) -> bool {
        self.state.lock().incremental_in_progress
    }

    fn was_incremental_gc(&self) -> bool {
        self.state.lock().was_incremental
    }

    fn is_exception_pending(&self) -> bool {
        self.state.lock().exception_pending
    }

    fn prepare_for_full_gc(&self) {
        self.state.lock().full_gc_preparations += 1;
    }

    fn prepare_zone_for_gc(&self, zone: ZoneId) {
        self.state.lock().prepared_zones.push(zone);
    }
}

/// A holder class whose instances own a configurable list of cells.
pub struct TestHolder {
    name: &'static str,
    single_zone: bool,
    edges: Mutex<FxHashMap<HolderId, Vec<GcCell>>>,
    traced: Mutex<Vec<HolderId>>,
    cleared: Mutex<Vec<HolderId>>,
    skip_queries: AtomicUsize,
}

impl TestHolder {
    fn new(name: &'static str, single_zone: bool) -> Self {
        Self {
            name,
            single_zone,
            edges: Mutex::new(FxHashMap::default()),
            traced: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            skip_queries: AtomicUsize::new(0),
        }
    }

    pub fn single_zone(name: &'static str) -> Self {
        Self::new(name, true)
    }

    pub fn multi_zone(name: &'static str) -> Self {
        Self::new(name, false)
    }

    pub fn set_edges(&self, holder: HolderId, cells: Vec<GcCell>) {
        self.edges.lock().insert(holder, cells);
    }

    /// Every holder traced so far, in order, with repeats.
    pub fn traced(&self) -> Vec<HolderId> {
        self.traced.lock().clone()
    }

    pub fn trace_count(&self) -> usize {
        self.traced.lock().len()
    }

    pub fn times_traced(&self, holder: HolderId) -> usize {
        self.traced.lock().iter().filter(|h| **h == holder).count()
    }

    pub fn cleared(&self) -> Vec<HolderId> {
        self.cleared.lock().clone()
    }

    pub fn skip_queries(&self) -> usize {
        self.skip_queries.load(Ordering::Relaxed)
    }

    /// Forget which holders were traced.
    pub fn reset(&self) {
        self.traced.lock().clear();
    }
}

impl HolderTracer for TestHolder {
    fn class_name(&self) -> &'static str {
        self.name
    }

    fn is_single_zone(&self) -> bool {
        self.single_zone
    }

    fn trace(&self, holder: HolderId, tracer: &mut dyn Tracer) {
        self.traced.lock().push(holder);
        let cells = self.edges.lock().get(&holder).cloned().unwrap_or_default();
        for cell in cells {
            tracer.on_edge(cell, "test holder edge");
        }
    }

    fn clear(&self, holder: HolderId) {
        self.cleared.lock().push(holder);
        self.edges.lock().remove(&holder);
    }

    fn can_skip(&self, _holder: HolderId, _remove_child_edges: bool) -> bool {
        self.skip_queries.fetch_add(1, Ordering::Relaxed);
        false
    }
}

/// Tracer that records every edge.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub edges: Vec<(GcCell, String)>,
    marking: bool,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that presents itself as the gray marker.
    pub fn marking() -> Self {
        Self {
            edges: Vec::new(),
            marking: true,
        }
    }

    pub fn cells(&self) -> Vec<GcCell> {
        self.edges.iter().map(|(cell, _)| *cell).collect()
    }
}

impl Tracer for RecordingTracer {
    fn on_edge(&mut self, cell: GcCell, name: &str) {
        self.edges.push((cell, name.to_string()));
    }

    fn is_marking_tracer(&self) -> bool {
        self.marking
    }
}

/// One call made on a [`RecordingCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcEvent {
    DescribeNode {
        marked: bool,
        name: String,
    },
    EdgeName(String),
    Edge(CellId),
    NativeEdge(NativeRef, Option<Participant>),
    NativeRoot(HolderId, Participant),
    WeakMapping {
        map: CellId,
        key: Option<CellId>,
        delegate: Option<CellId>,
        value: Option<CellId>,
    },
}

/// Cycle collector stand-in that records the traversal protocol.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    pub events: Vec<CcEvent>,
    flags: TraversalFlags,
}

impl RecordingCallback {
    pub fn new(flags: TraversalFlags) -> Self {
        Self {
            events: Vec::new(),
            flags,
        }
    }

    pub fn edges(&self) -> Vec<CellId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                CcEvent::Edge(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                CcEvent::DescribeNode { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn native_roots(&self) -> Vec<HolderId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                CcEvent::NativeRoot(holder, _) => Some(*holder),
                _ => None,
            })
            .collect()
    }

    pub fn weak_mapping_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, CcEvent::WeakMapping { .. }))
            .count()
    }
}

impl TraversalCallback for RecordingCallback {
    fn flags(&self) -> TraversalFlags {
        self.flags
    }

    fn describe_node(&mut self, marked: bool, name: &str) {
        self.events.push(CcEvent::DescribeNode {
            marked,
            name: name.to_string(),
        });
    }

    fn note_edge_name(&mut self, name: &str) {
        self.events.push(CcEvent::EdgeName(name.to_string()));
    }

    fn note_edge(&mut self, target: GcCell) {
        self.events.push(CcEvent::Edge(target.id));
    }

    fn note_native_edge(&mut self, target: NativeRef, participant: Option<Participant>) {
        self.events.push(CcEvent::NativeEdge(target, participant));
    }
}

impl NoteRootCallback for RecordingCallback {
    fn flags(&self) -> TraversalFlags {
        self.flags
    }

    fn note_native_root(&mut self, holder: HolderId, participant: Participant) {
        self.events.push(CcEvent::NativeRoot(holder, participant));
    }

    fn note_weak_mapping(
        &mut self,
        map: GcCell,
        key: Option<GcCell>,
        delegate: Option<GcCell>,
        value: Option<GcCell>,
    ) {
        self.events.push(CcEvent::WeakMapping {
            map: map.id,
            key: key.map(|k| k.id),
            delegate: delegate.map(|d| d.id),
            value: value.map(|v| v.id),
        });
    }
}
