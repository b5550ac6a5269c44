//! Resumable cursors over the holder registries.
//!
//! A cursor is plain data: position plus the zones still to visit. Every
//! operation borrows the registry it walks, so a cursor can be parked in
//! the collector context between slices while native code keeps adding and
//! removing holders. Removal only tombstones slots while a cursor is open;
//! [`HolderCursor::settle`] compacts a tombstone before it is ever returned.

use smallvec::SmallVec;

use crate::holders::list::HolderList;
use crate::holders::map::HolderMap;
use crate::holders::TracerRef;
use crate::types::{HolderId, ZoneId};

/// Which holders a pass must visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichHolders {
    All,
    /// Only zone buckets whose gray roots the current collection needs, plus
    /// every multi-zone holder.
    RequiredForGrayMarking,
}

/// The entry under a cursor.
#[derive(Clone)]
pub struct CursorEntry {
    pub holder: HolderId,
    pub tracer: TracerRef,
    /// Zone bucket the entry was registered under, if any.
    pub zone: Option<ZoneId>,
}

/// Operations shared by the map and list cursors.
pub trait HolderCursor {
    type Store;

    fn is_done(&self) -> bool;

    fn entry(&self, store: &Self::Store) -> Option<CursorEntry>;

    fn advance(&mut self, store: &mut Self::Store);

    /// Compact any tombstone now under the cursor. Called before resuming.
    fn settle(&mut self, store: &mut Self::Store);

    /// Close the cursor, allowing eager compaction again.
    fn finish(self, store: &mut Self::Store);
}

/// Position inside a [`HolderMap`]: the any-zone bucket first, then each
/// selected zone bucket.
#[derive(Debug)]
pub struct MapCursor {
    bucket: Option<ZoneId>,
    offset: usize,
    pending_zones: SmallVec<[ZoneId; 8]>,
    done: bool,
}

impl MapCursor {
    /// Open a cursor.
    ///
    /// # Panics
    ///
    /// Panics if the map already has an open cursor. Two cursors would
    /// compact under each other.
    pub fn begin(map: &mut HolderMap, which: WhichHolders, needs_zone: impl Fn(ZoneId) -> bool) -> Self {
        assert!(!map.has_iterator, "nested iteration of the holder map");
        map.has_iterator = true;

        let mut pending_zones: SmallVec<[ZoneId; 8]> = map
            .zones()
            .filter(|zone| which == WhichHolders::All || needs_zone(*zone))
            .collect();
        // Popped from the back, so visit zones in ascending order.
        pending_zones.sort_unstable_by(|a, b| b.cmp(a));

        let mut cursor = Self {
            bucket: None,
            offset: 0,
            pending_zones,
            done: false,
        };
        cursor.settle(map);
        cursor
    }

    pub fn current_zone(&self) -> Option<ZoneId> {
        self.bucket
    }
}

impl HolderCursor for MapCursor {
    type Store = HolderMap;

    fn is_done(&self) -> bool {
        self.done
    }

    fn entry(&self, map: &HolderMap) -> Option<CursorEntry> {
        if self.done {
            return None;
        }
        let entry = map.bucket(self.bucket)?.get(self.offset)?;
        Some(CursorEntry {
            holder: entry.holder,
            tracer: entry.tracer.clone()?,
            zone: self.bucket,
        })
    }

    fn advance(&mut self, map: &mut HolderMap) {
        if self.done {
            return;
        }
        self.offset += 1;
        self.settle(map);
    }

    fn settle(&mut self, map: &mut HolderMap) {
        while !self.done {
            while map.bucket(self.bucket).is_some_and(|b| self.offset < b.len())
                && map.compact_at(self.bucket, self.offset)
            {
                if map.bucket(self.bucket).is_some_and(|b| b[self.offset].tracer.is_some()) {
                    return;
                }
            }

            if let Some(zone) = self.bucket {
                map.remove_zone_if_empty(zone);
            }
            match self.pending_zones.pop() {
                Some(zone) => {
                    self.bucket = Some(zone);
                    self.offset = 0;
                }
                None => self.done = true,
            }
        }
    }

    fn finish(self, map: &mut HolderMap) {
        map.has_iterator = false;
    }
}

/// Position inside a [`HolderList`].
#[derive(Debug)]
pub struct ListCursor {
    offset: usize,
    done: bool,
}

impl ListCursor {
    /// Open a cursor. The list has no zone buckets, so every holder is
    /// visited regardless of the selector.
    ///
    /// # Panics
    ///
    /// Panics if the list already has an open cursor.
    pub fn begin(list: &mut HolderList) -> Self {
        assert!(!list.has_iterator, "nested iteration of the holder list");
        list.has_iterator = true;
        let mut cursor = Self {
            offset: 0,
            done: false,
        };
        cursor.settle(list);
        cursor
    }
}

impl HolderCursor for ListCursor {
    type Store = HolderList;

    fn is_done(&self) -> bool {
        self.done
    }

    fn entry(&self, list: &HolderList) -> Option<CursorEntry> {
        if self.done {
            return None;
        }
        let entry = list.entries().get(self.offset)?;
        Some(CursorEntry {
            holder: entry.holder,
            tracer: entry.tracer.clone()?,
            zone: None,
        })
    }

    fn advance(&mut self, list: &mut HolderList) {
        if self.done {
            return;
        }
        self.offset += 1;
        self.settle(list);
    }

    fn settle(&mut self, list: &mut HolderList) {
        if self.done {
            return;
        }
        while self.offset < list.entries().len() && list.compact_at(self.offset) {
            if list.entries()[self.offset].tracer.is_some() {
                return;
            }
        }
        self.done = true;
    }

    fn finish(self, list: &mut HolderList) {
        list.has_iterator = false;
    }
}

/// Position of the gray-root pass, parked between slices.
#[derive(Debug, Default)]
pub enum IterationCursor {
    #[default]
    NotStarted,
    Registry(MapCursor),
    List(ListCursor),
    Done,
}

impl IterationCursor {
    pub fn is_not_started(&self) -> bool {
        matches!(self, IterationCursor::NotStarted)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, IterationCursor::Registry(_) | IterationCursor::List(_))
    }
}
