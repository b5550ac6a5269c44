//! Weak mappings in the cycle collector graph, and the gray-bit fix-up that
//! keeps them consistent with the black-gray invariant.
//!
//! A weak mapping keeps its value alive only while both the map and the key
//! are alive. The cycle collector cannot express that with plain edges, so
//! each interesting entry is reported as a `(map, key, delegate, value)`
//! tuple.

use rustc_hash::FxHashSet;

use crate::engine::{GcEngine, WeakMapEntry};
use crate::error::report_invariant_violation;
use crate::traversal::NoteRootCallback;
use crate::types::{CellId, GcCell, TraceKind};

/// Report every weak mapping that could keep something gray alive.
pub fn note_weak_maps(engine: &dyn GcEngine, cb: &mut dyn NoteRootCallback) {
    for entry in engine.weak_map_entries() {
        note_weak_mapping(engine, entry, cb);
    }
}

fn note_weak_mapping(engine: &dyn GcEngine, entry: WeakMapEntry, cb: &mut dyn NoteRootCallback) {
    let want_all = cb.want_all_traces();
    let WeakMapEntry { map, key, value } = entry;

    let key_gray = key.is_some_and(|key| engine.is_gray(key));
    if !key_gray && !want_all && (value.kind == TraceKind::String || !engine.is_gray(value)) {
        return;
    }

    // A key the cycle collector cannot model is treated as always alive.
    // That may leak, but dropping the mapping could free live objects.
    if key.is_some_and(|key| !key.is_cc_kind()) {
        report_invariant_violation("weak map key is not a cycle collector kind");
    }
    let key = key.filter(GcCell::is_cc_kind);
    let delegate = key
        .filter(|key| key.kind.is_object())
        .and_then(|key| engine.unwrap_delegate(key));

    if value.is_cc_kind() {
        cb.note_weak_mapping(map, key, delegate, Some(value));
        return;
    }

    let mut traced_any = false;
    if value.kind != TraceKind::String {
        let mut pending = vec![value];
        let mut seen: FxHashSet<CellId> = FxHashSet::default();
        seen.insert(value.id);
        while let Some(cell) = pending.pop() {
            let mut children = Vec::new();
            engine.trace_children(cell, &mut |child, _| children.push(child));
            for child in children {
                if child.kind == TraceKind::String {
                    continue;
                }
                if !want_all && !engine.is_gray(child) {
                    continue;
                }
                if child.is_cc_kind() {
                    cb.note_weak_mapping(map, key, delegate, Some(child));
                    traced_any = true;
                } else if seen.insert(child.id) {
                    pending.push(child);
                }
            }
        }
    }

    // The delegate can keep the key alive, so make sure the collector hears
    // about the entry at least once.
    if !traced_any && key.is_some_and(|key| engine.is_gray(key)) && delegate.is_some() {
        cb.note_weak_mapping(map, key, delegate, None);
    }
}

/// Which side of a weak mapping is gray but must be black.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShouldBeBlack {
    pub key: bool,
    pub value: bool,
}

impl ShouldBeBlack {
    pub fn any(self) -> bool {
        self.key || self.value
    }
}

/// Apply the black-gray invariant to one mapping.
///
/// The key must be black when it is gray but its delegate and the map are
/// not. The value must be black when it is gray and neither the key nor the
/// map is.
pub fn should_weak_mapping_entry_be_black(engine: &dyn GcEngine, entry: &WeakMapEntry) -> ShouldBeBlack {
    let WeakMapEntry { map, key, value } = *entry;
    let mut result = ShouldBeBlack::default();

    let key_might_need_marking = key.is_some_and(|key| engine.is_gray(key));
    let value_might_need_marking = value.kind != TraceKind::String && engine.is_gray(value);
    if !key_might_need_marking && !value_might_need_marking {
        return result;
    }

    let key = key.filter(GcCell::is_cc_kind);
    let map_gray = engine.is_gray(map);

    if key_might_need_marking {
        if let Some(key) = key.filter(|key| key.kind.is_object()) {
            if let Some(delegate) = engine.unwrap_delegate(key) {
                if !engine.is_gray(delegate) && !map_gray {
                    result.key = true;
                }
            }
        }
    }

    if engine.is_gray(value)
        && !key.is_some_and(|key| engine.is_gray(key))
        && !map_gray
        && value.kind != TraceKind::Shape
    {
        result.value = true;
    }

    result
}

/// Blacken every weak-map key and value that should be black, repeating
/// until nothing changes. Returns the number of cells that changed color.
///
/// Must not run while the engine is marking.
pub fn fix_weak_mapping_gray_bits(engine: &dyn GcEngine) -> usize {
    debug_assert!(
        !engine.is_incremental_gc_in_progress(),
        "weak map gray bits fixed during a GC"
    );

    let mut changed = 0;
    let mut rounds = 0;
    loop {
        let mut any_marked = false;
        for entry in engine.weak_map_entries() {
            let should = should_weak_mapping_entry_be_black(engine, &entry);
            if let (true, Some(key)) = (should.key, entry.key) {
                if engine.unmark_gray_recursively(key) {
                    any_marked = true;
                    changed += 1;
                }
            }
            if should.value && engine.unmark_gray_recursively(entry.value) {
                any_marked = true;
                changed += 1;
            }
        }
        rounds += 1;
        if !any_marked {
            break;
        }
    }
    tracing::debug!(target: "ccbridge::weak_maps", rounds, changed, "weak map gray bits fixed");
    changed
}

/// Entries that still violate the black-gray invariant.
pub fn check_weak_mapping_gray_bits(engine: &dyn GcEngine) -> Vec<WeakMapEntry> {
    engine
        .weak_map_entries()
        .into_iter()
        .filter(|entry| {
            let should = should_weak_mapping_entry_be_black(engine, entry);
            if should.any() {
                tracing::error!(
                    target: "ccbridge::weak_maps",
                    map = %entry.map,
                    key = ?entry.key.map(|k| k.to_string()),
                    value = %entry.value,
                    key_should_be_black = should.key,
                    value_should_be_black = should.value,
                    "weak mapping breaks the black-gray invariant"
                );
            }
            should.any()
        })
        .collect()
}
