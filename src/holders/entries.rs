//! Slot storage shared by the map and list registries.

use crate::holders::TracerRef;
use crate::types::HolderId;

/// A registry slot. A slot whose tracer is `None` is a tombstone left by a
/// removal that happened while an iterator was open.
pub(crate) trait Slot {
    fn is_live(&self) -> bool;
}

#[derive(Clone)]
pub(crate) struct MapEntry {
    pub(crate) holder: HolderId,
    pub(crate) tracer: Option<TracerRef>,
}

impl Slot for MapEntry {
    fn is_live(&self) -> bool {
        self.tracer.is_some()
    }
}

/// Remove the dead slot at `at`.
///
/// Trailing tombstones are popped first so the entry swapped into `at` is
/// live; `relocated` is told about it so back-references can follow.
/// Returns whether `at` still indexes an element afterwards.
pub(crate) fn remove_dead_at<E: Slot>(
    entries: &mut Vec<E>,
    at: usize,
    mut relocated: impl FnMut(&E, usize),
) -> bool {
    debug_assert!(!entries[at].is_live());

    while entries.len() - 1 > at && !entries[entries.len() - 1].is_live() {
        entries.pop();
    }

    if entries.len() - 1 == at {
        entries.pop();
        return false;
    }

    entries.swap_remove(at);
    relocated(&entries[at], at);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct S(Option<u32>);

    impl Slot for S {
        fn is_live(&self) -> bool {
            self.0.is_some()
        }
    }

    #[test]
    fn test_remove_last() {
        let mut v = vec![S(Some(1)), S(None)];
        assert!(!remove_dead_at(&mut v, 1, |_, _| panic!("nothing moves")));
        assert_eq!(v, vec![S(Some(1))]);
    }

    #[test]
    fn test_trailing_tombstones_are_popped() {
        let mut v = vec![S(None), S(Some(2)), S(None), S(None)];
        let mut moved = Vec::new();
        assert!(remove_dead_at(&mut v, 0, |e, at| moved.push((e.0, at))));
        assert_eq!(v, vec![S(Some(2))]);
        assert_eq!(moved, vec![(Some(2), 0)]);
    }

    #[test]
    fn test_all_dead_tail() {
        let mut v = vec![S(Some(1)), S(None), S(None)];
        assert!(!remove_dead_at(&mut v, 1, |_, _| {}));
        assert_eq!(v, vec![S(Some(1))]);
    }
}
