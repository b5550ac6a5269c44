//! Identity-indexed holder storage, bucketed by zone.

use rustc_hash::FxHashMap;

use crate::error::{report_invariant_violation, BridgeError, BridgeResult};
use crate::holders::entries::{remove_dead_at, MapEntry, Slot};
use crate::holders::{same_tracer, TracerRef};
use crate::types::{HolderId, ZoneId};

/// Where an entry lives: the bucket (`None` for the any-zone bucket) and
/// its offset in that bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) zone: Option<ZoneId>,
    pub(crate) slot: usize,
}

/// Holders looked up by identity.
///
/// Multi-zone holders share one bucket. Single-zone holders registered with
/// a zone get a bucket per zone, so a zone-scoped collection can skip the
/// buckets of zones it is not collecting.
pub struct HolderMap {
    index: FxHashMap<HolderId, Location>,
    any_zone: Vec<MapEntry>,
    per_zone: FxHashMap<ZoneId, Vec<MapEntry>>,
    pub(crate) has_iterator: bool,
}

impl HolderMap {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut index = FxHashMap::default();
        index.reserve(capacity);
        Self {
            index,
            any_zone: Vec::with_capacity(capacity),
            per_zone: FxHashMap::default(),
            has_iterator: false,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn has(&self, holder: HolderId) -> bool {
        self.index.contains_key(&holder)
    }

    pub fn zone_count(&self) -> usize {
        self.per_zone.len()
    }

    pub fn put(&mut self, holder: HolderId, tracer: TracerRef, zone: Option<ZoneId>) -> BridgeResult<()> {
        let zone = if tracer.is_single_zone() { zone } else { None };

        if let Some(location) = self.index.get(&holder).copied() {
            if let (Some(requested), Some(current)) = (zone, location.zone) {
                if requested != current {
                    report_invariant_violation("holder re-registered under a different zone");
                }
            }
            let entry = &mut self.bucket_mut(location.zone)[location.slot];
            debug_assert_eq!(entry.holder, holder);
            if let Some(existing) = &entry.tracer {
                if !same_tracer(existing, &tracer) {
                    report_invariant_violation("holder re-registered with a different tracer");
                }
            }
            entry.tracer = Some(tracer);
            return Ok(());
        }

        self.index.try_reserve(1).map_err(|_| BridgeError::AllocationFailed {
            what: "holder index",
        })?;

        let bucket = match zone {
            None => &mut self.any_zone,
            Some(zone) => {
                if !self.per_zone.contains_key(&zone) {
                    self.per_zone
                        .try_reserve(1)
                        .map_err(|_| BridgeError::AllocationFailed { what: "zone table" })?;
                }
                self.per_zone.entry(zone).or_default()
            }
        };
        bucket
            .try_reserve(1)
            .map_err(|_| BridgeError::AllocationFailed { what: "zone bucket" })?;

        let slot = bucket.len();
        bucket.push(MapEntry {
            holder,
            tracer: Some(tracer),
        });
        self.index.insert(holder, Location { zone, slot });
        Ok(())
    }

    pub fn get(&self, holder: HolderId) -> Option<TracerRef> {
        let location = self.index.get(&holder)?;
        let entry = self.bucket(location.zone)?.get(location.slot)?;
        debug_assert_eq!(entry.holder, holder);
        entry.tracer.clone()
    }

    /// Unregister `holder` and hand back its tracer. Idempotent.
    ///
    /// While an iterator is open the slot is only tombstoned; the iterator
    /// compacts it when it gets there.
    pub fn extract(&mut self, holder: HolderId) -> Option<TracerRef> {
        let location = self.index.remove(&holder)?;
        let tracer = self.bucket_mut(location.zone)[location.slot].tracer.take();

        if !self.has_iterator {
            self.compact_at(location.zone, location.slot);
            if let Some(zone) = location.zone {
                if self.per_zone.get(&zone).is_some_and(Vec::is_empty) {
                    self.per_zone.remove(&zone);
                }
            }
        }

        tracer
    }

    pub(crate) fn bucket(&self, zone: Option<ZoneId>) -> Option<&Vec<MapEntry>> {
        match zone {
            None => Some(&self.any_zone),
            Some(zone) => self.per_zone.get(&zone),
        }
    }

    fn bucket_mut(&mut self, zone: Option<ZoneId>) -> &mut Vec<MapEntry> {
        match zone {
            None => &mut self.any_zone,
            Some(zone) => self.per_zone.entry(zone).or_default(),
        }
    }

    pub(crate) fn zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.per_zone.keys().copied()
    }

    /// Drop the tombstone at `slot`. Returns whether `slot` still indexes an
    /// entry of the bucket.
    pub(crate) fn compact_at(&mut self, zone: Option<ZoneId>, slot: usize) -> bool {
        let Self {
            index,
            any_zone,
            per_zone,
            ..
        } = self;
        let bucket = match zone {
            None => any_zone,
            Some(zone) => match per_zone.get_mut(&zone) {
                Some(bucket) => bucket,
                None => return false,
            },
        };
        if slot >= bucket.len() || bucket[slot].is_live() {
            return slot < bucket.len();
        }
        remove_dead_at(bucket, slot, |moved, at| {
            if let Some(location) = index.get_mut(&moved.holder) {
                location.slot = at;
            }
        })
    }

    pub(crate) fn remove_zone_if_empty(&mut self, zone: ZoneId) {
        if self.per_zone.get(&zone).is_some_and(Vec::is_empty) {
            self.per_zone.remove(&zone);
        }
    }

    /// Visit every live entry without disturbing any open iterator.
    pub fn for_each_live(&self, mut f: impl FnMut(HolderId, &TracerRef, Option<ZoneId>)) {
        let any = self.any_zone.iter().map(|e| (e, None));
        let zoned = self
            .per_zone
            .iter()
            .flat_map(|(zone, bucket)| bucket.iter().map(move |e| (e, Some(*zone))));
        for (entry, zone) in any.chain(zoned) {
            if let Some(tracer) = &entry.tracer {
                f(entry.holder, tracer, zone);
            }
        }
    }

    pub fn size_of_excluding_this(&self) -> usize {
        let entry = std::mem::size_of::<MapEntry>();
        let index = self.index.capacity()
            * (std::mem::size_of::<HolderId>() + std::mem::size_of::<Location>());
        let zones = self.per_zone.capacity()
            * (std::mem::size_of::<ZoneId>() + std::mem::size_of::<Vec<MapEntry>>());
        let buckets: usize = self
            .per_zone
            .values()
            .map(|bucket| bucket.capacity() * entry)
            .sum();
        index + zones + buckets + self.any_zone.capacity() * entry
    }

    #[cfg(test)]
    pub(crate) fn location(&self, holder: HolderId) -> Option<Location> {
        self.index.get(&holder).copied()
    }
}

impl Default for HolderMap {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestHolder;
    use std::sync::Arc;

    fn single(name: &'static str) -> TracerRef {
        Arc::new(TestHolder::single_zone(name))
    }

    fn multi(name: &'static str) -> TracerRef {
        Arc::new(TestHolder::multi_zone(name))
    }

    #[test]
    fn test_multi_zone_holder_ignores_zone() {
        let mut map = HolderMap::default();
        map.put(HolderId(1), multi("c"), Some(ZoneId(5))).unwrap();
        assert_eq!(map.location(HolderId(1)).unwrap().zone, None);
        assert_eq!(map.zone_count(), 0);
    }

    #[test]
    fn test_single_zone_holder_gets_bucket() {
        let mut map = HolderMap::default();
        map.put(HolderId(1), single("a"), Some(ZoneId(5))).unwrap();
        assert_eq!(map.location(HolderId(1)).unwrap().zone, Some(ZoneId(5)));
        assert_eq!(map.zone_count(), 1);
    }

    #[test]
    fn test_extract_is_idempotent_and_drops_empty_bucket() {
        let mut map = HolderMap::default();
        map.put(HolderId(1), single("a"), Some(ZoneId(2))).unwrap();
        assert!(map.extract(HolderId(1)).is_some());
        assert!(map.extract(HolderId(1)).is_none());
        assert_eq!(map.zone_count(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_swap_remove_fixes_index() {
        let mut map = HolderMap::default();
        let tracer = multi("m");
        for i in 0..4 {
            map.put(HolderId(i), tracer.clone(), None).unwrap();
        }
        map.extract(HolderId(0));
        assert_eq!(map.location(HolderId(3)).unwrap().slot, 0);
        assert!(map.get(HolderId(3)).is_some());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_extract_while_iterating_leaves_tombstone() {
        let mut map = HolderMap::default();
        let tracer = multi("m");
        map.put(HolderId(1), tracer.clone(), None).unwrap();
        map.put(HolderId(2), tracer, None).unwrap();
        map.has_iterator = true;
        map.extract(HolderId(1));
        assert_eq!(map.bucket(None).unwrap().len(), 2);
        assert!(map.get(HolderId(1)).is_none());
        assert!(map.compact_at(None, 0));
        assert_eq!(map.location(HolderId(2)).unwrap().slot, 0);
    }

    #[test]
    fn test_reregister_same_tracer_overwrites() {
        let mut map = HolderMap::default();
        let tracer = multi("m");
        map.put(HolderId(1), tracer.clone(), None).unwrap();
        map.put(HolderId(1), tracer, None).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "different tracer")]
    fn test_reregister_different_tracer_is_fatal_in_debug() {
        let mut map = HolderMap::default();
        map.put(HolderId(1), multi("m"), None).unwrap();
        map.put(HolderId(1), multi("n"), None).unwrap();
    }
}
