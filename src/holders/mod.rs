//! Registry of native holders that own references into the GC heap.

pub mod cursor;
mod entries;
pub mod list;
pub mod map;

use std::sync::Arc;

use crate::engine::{FnTracer, GcEngine, Participant, Tracer};
use crate::error::BridgeResult;
use crate::types::{HolderId, ZoneId};

pub use cursor::{CursorEntry, HolderCursor, IterationCursor, ListCursor, MapCursor, WhichHolders};
pub use list::{HolderKey, HolderList};
pub use map::HolderMap;

/// Per-class capability of a native holder.
///
/// One tracer instance is typically shared by every holder of a class; the
/// holder identity is passed to each call.
pub trait HolderTracer {
    fn class_name(&self) -> &'static str;

    /// Whether every referent of holders of this class lives in one zone
    /// (plus the atoms zone).
    fn is_single_zone(&self) -> bool {
        false
    }

    /// Report every GC reference the holder owns.
    fn trace(&self, holder: HolderId, tracer: &mut dyn Tracer);

    /// Drop every GC reference the holder owns.
    fn clear(&self, holder: HolderId);

    /// Whether the cycle collector can skip this holder entirely.
    fn can_skip(&self, _holder: HolderId, _remove_child_edges: bool) -> bool {
        false
    }

    /// The participant the cycle collector uses for the holder's native side.
    fn participant(&self) -> Participant {
        Participant(self.class_name())
    }

    /// Whether the holder keeps anything gray that the cycle collector
    /// models, i.e. whether it is worth reporting as a root.
    fn participates_in_collection(&self, holder: HolderId, engine: &dyn GcEngine) -> bool {
        let mut found = false;
        let mut tracer = FnTracer::new(|cell, _: &str| {
            if !found && cell.is_cc_kind() && engine.is_gray(cell) {
                found = true;
            }
        });
        self.trace(holder, &mut tracer);
        found
    }
}

pub type TracerRef = Arc<dyn HolderTracer>;

/// Identity comparison of tracers, ignoring vtable addresses.
pub fn same_tracer(a: &TracerRef, b: &TracerRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Both registries: identity-indexed holders and keyed holders.
pub struct HolderRegistry {
    pub(crate) map: HolderMap,
    pub(crate) list: HolderList,
}

impl HolderRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HolderMap::with_capacity(capacity),
            list: HolderList::with_capacity(capacity),
        }
    }

    /// Register `holder`. Re-registering overwrites the tracer.
    pub fn add(&mut self, holder: HolderId, tracer: TracerRef, zone: Option<ZoneId>) -> BridgeResult<()> {
        self.map.put(holder, tracer, zone)
    }

    pub fn add_with_key(&mut self, holder: HolderId, tracer: TracerRef, key: &HolderKey) -> BridgeResult<()> {
        self.list.put(holder, tracer, key)
    }

    /// Unregister `holder` and clear its GC references. Removing an
    /// unregistered holder is a no-op returning `None`.
    pub fn remove(&mut self, holder: HolderId) -> Option<TracerRef> {
        let tracer = self.map.extract(holder)?;
        tracer.clear(holder);
        Some(tracer)
    }

    pub fn remove_with_key(&mut self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        let tracer = self.list.extract(holder, key)?;
        tracer.clear(holder);
        Some(tracer)
    }

    pub fn get(&self, holder: HolderId) -> Option<TracerRef> {
        self.map.get(holder)
    }

    pub fn get_with_key(&self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        self.list.get(holder, key)
    }

    pub fn has(&self, holder: HolderId) -> bool {
        self.map.has(holder)
    }

    pub fn has_key(&self, key: &HolderKey) -> bool {
        key.is_registered()
    }

    pub fn len(&self) -> usize {
        self.map.len() + self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.list.is_empty()
    }

    /// Visit every live holder in both registries.
    pub fn for_each_live(&self, mut f: impl FnMut(HolderId, &TracerRef)) {
        self.map.for_each_live(|holder, tracer, _| f(holder, tracer));
        self.list.for_each_live(&mut f);
    }

    /// Let every holder drop edges the cycle collector does not need.
    pub fn unmark_skippable(&self) {
        self.for_each_live(|holder, tracer| {
            tracer.can_skip(holder, true);
        });
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.map.size_of_excluding_this() + self.list.size_of_excluding_this()
    }
}

impl Default for HolderRegistry {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
