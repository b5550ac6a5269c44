//! Groups of deferred finalizations that share one release routine.

use std::any::{Any, TypeId};

/// Items finalized together by the same routine.
///
/// A group is created on first use, collects items through
/// [`append`](Self::append), and is later drained in slices by
/// [`release_slice`](Self::release_slice).
pub trait FinalizeGroup: Default + Send + 'static {
    type Item;

    fn append(&mut self, item: Self::Item);

    /// Finalize at most `limit` items. Returns `true` once the group is
    /// empty.
    fn release_slice(&mut self, limit: u32) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Object-safe face of [`FinalizeGroup`] used by the queue's table.
pub(crate) trait ErasedGroup: Send {
    fn release_slice(&mut self, limit: u32) -> bool;

    fn len(&self) -> usize;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<G: FinalizeGroup> ErasedGroup for G {
    fn release_slice(&mut self, limit: u32) -> bool {
        FinalizeGroup::release_slice(self, limit)
    }

    fn len(&self) -> usize {
        FinalizeGroup::len(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) fn group_key<G: FinalizeGroup>() -> TypeId {
    TypeId::of::<G>()
}

/// The common case: finalizing an item means dropping it.
///
/// Items are dropped newest first.
pub struct DropBatch<T> {
    items: Vec<T>,
}

impl<T> Default for DropBatch<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Send + 'static> FinalizeGroup for DropBatch<T> {
    type Item = T;

    fn append(&mut self, item: T) {
        self.items.push(item);
    }

    fn release_slice(&mut self, limit: u32) -> bool {
        let keep = self.items.len().saturating_sub(limit as usize);
        self.items.truncate(keep);
        if self.items.is_empty() {
            self.items.shrink_to_fit();
            return true;
        }
        false
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_drop_batch_releases_in_slices() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut batch = DropBatch::default();
        for _ in 0..5 {
            batch.append(Counted(dropped.clone()));
        }
        assert!(!FinalizeGroup::release_slice(&mut batch, 2));
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert!(!FinalizeGroup::release_slice(&mut batch, 2));
        assert!(FinalizeGroup::release_slice(&mut batch, 2));
        assert_eq!(dropped.load(Ordering::Relaxed), 5);
        assert!(FinalizeGroup::is_empty(&batch));
    }

    #[test]
    fn test_group_keys_differ_by_item_type() {
        assert_ne!(group_key::<DropBatch<u8>>(), group_key::<DropBatch<u16>>());
        assert_eq!(group_key::<DropBatch<u8>>(), group_key::<DropBatch<u8>>());
    }
}
