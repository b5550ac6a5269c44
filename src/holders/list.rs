//! Holders that carry their own registration key.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{report_invariant_violation, BridgeError, BridgeResult};
use crate::holders::entries::{remove_dead_at, Slot};
use crate::holders::{same_tracer, TracerRef};
use crate::types::HolderId;

const UNREGISTERED: usize = usize::MAX;

/// Back-reference from a holder to its slot in a [`HolderList`].
///
/// The holder keeps a clone; the list updates the slot when compaction moves
/// the entry, so lookups never hash.
#[derive(Debug, Clone)]
pub struct HolderKey(Arc<AtomicUsize>);

impl HolderKey {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(UNREGISTERED)))
    }

    pub fn is_registered(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> Option<usize> {
        match self.0.load(Ordering::Relaxed) {
            UNREGISTERED => None,
            slot => Some(slot),
        }
    }

    fn set(&self, slot: Option<usize>) {
        self.0.store(slot.unwrap_or(UNREGISTERED), Ordering::Relaxed);
    }
}

impl Default for HolderKey {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub(crate) struct ListEntry {
    pub(crate) holder: HolderId,
    key: HolderKey,
    pub(crate) tracer: Option<TracerRef>,
}

impl Slot for ListEntry {
    fn is_live(&self) -> bool {
        self.tracer.is_some()
    }
}

/// Flat list of keyed holders. Never zone-filtered.
#[derive(Default)]
pub struct HolderList {
    entries: Vec<ListEntry>,
    live: usize,
    pub(crate) has_iterator: bool,
}

impl HolderList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            live: 0,
            has_iterator: false,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn put(&mut self, holder: HolderId, tracer: TracerRef, key: &HolderKey) -> BridgeResult<()> {
        if let Some(slot) = key.slot() {
            let Some(entry) = self.keyed_entry(holder, slot) else {
                return Ok(());
            };
            if let Some(existing) = &entry.tracer {
                if !same_tracer(existing, &tracer) {
                    report_invariant_violation("holder re-registered with a different tracer");
                }
            }
            entry.tracer = Some(tracer);
            return Ok(());
        }

        self.entries
            .try_reserve(1)
            .map_err(|_| BridgeError::AllocationFailed { what: "holder list" })?;
        key.set(Some(self.entries.len()));
        self.entries.push(ListEntry {
            holder,
            key: key.clone(),
            tracer: Some(tracer),
        });
        self.live += 1;
        Ok(())
    }

    pub fn get(&self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        let entry = self.entries.get(key.slot()?)?;
        debug_assert_eq!(entry.holder, holder);
        if entry.holder != holder {
            return None;
        }
        entry.tracer.clone()
    }

    pub fn extract(&mut self, holder: HolderId, key: &HolderKey) -> Option<TracerRef> {
        let slot = key.slot()?;
        let entry = self.keyed_entry(holder, slot)?;
        let tracer = entry.tracer.take();
        key.set(None);
        self.live -= 1;
        if !self.has_iterator {
            self.compact_at(slot);
        }
        tracer
    }

    /// The entry a key points at. A key from another list, or one whose slot
    /// holds a different holder, is a programmer error.
    fn keyed_entry(&mut self, holder: HolderId, slot: usize) -> Option<&mut ListEntry> {
        match self.entries.get_mut(slot) {
            Some(entry) if entry.holder == holder => Some(entry),
            _ => {
                report_invariant_violation("holder key does not belong to this list");
                None
            }
        }
    }

    pub(crate) fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    /// Drop the tombstone at `slot`, fixing the key of whatever moves in.
    pub(crate) fn compact_at(&mut self, slot: usize) -> bool {
        if slot >= self.entries.len() || self.entries[slot].is_live() {
            return slot < self.entries.len();
        }
        remove_dead_at(&mut self.entries, slot, |moved, at| moved.key.set(Some(at)))
    }

    pub fn for_each_live(&self, mut f: impl FnMut(HolderId, &TracerRef)) {
        for entry in &self.entries {
            if let Some(tracer) = &entry.tracer {
                f(entry.holder, tracer);
            }
        }
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<ListEntry>()
    }
}
