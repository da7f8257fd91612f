use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::{
    Entry, QueueCfg,
    error::{QueueError, Result},
    heap::Heap,
};

/// Thread-safe max-priority queue whose members can be re-prioritized or deleted by key.
///
/// Every operation holds one internal lock for its entire body, so operations are fully
/// serialized. Share it between threads through an [`std::sync::Arc`].
#[derive(Debug)]
pub struct PriorityQueue<P> {
    storage: Mutex<Heap<P>>,
}

impl<P> PriorityQueue<P> {
    pub fn new() -> Self {
        Self::from_cfg(QueueCfg::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_cfg(QueueCfg { capacity })
    }

    pub fn from_cfg(cfg: QueueCfg) -> Self {
        Self {
            storage: Mutex::new(Heap::with_capacity(cfg.capacity)),
        }
    }

    /// Heap primitives never leave the store half-updated at a point where a panic could unwind,
    /// so a poisoned lock still guards a consistent heap.
    fn storage(&self) -> MutexGuard<'_, Heap<P>> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.storage().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage().is_empty()
    }

    pub fn push(&self, entry: Entry<P>) {
        trace!(
            primary_key = %entry.primary_key,
            group_key = %entry.group_key,
            priority = entry.priority,
            "push"
        );
        self.storage().push(entry);
    }

    /// Removes and returns the entry with the highest priority.
    /// # Error
    /// [`QueueError::EmptyQueue`] if there is nothing to pop.
    pub fn pop(&self) -> Result<Entry<P>> {
        let entry = self.storage().pop()?;
        trace!(primary_key = %entry.primary_key, priority = entry.priority, "pop");
        Ok(entry)
    }

    /// Pops up to `n` entries in priority order under a single lock acquisition.
    pub fn drain(&self, n: usize) -> Vec<Entry<P>> {
        let mut storage = self.storage();

        let mut items = Vec::with_capacity(n.min(storage.len()));
        for _ in 0..n {
            let Ok(entry) = storage.pop() else {
                break;
            };
            items.push(entry);
        }

        trace!(requested = n, drained = items.len(), "drain");
        items
    }

    /// Pops every entry and discards it. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut storage = self.storage();

        let mut cleared = 0;
        while storage.pop().is_ok() {
            cleared += 1;
        }
        cleared
    }

    /// Drops every remaining entry together with the backing allocation and consumes the queue.
    pub fn destroy(self) -> usize {
        let mut storage = self
            .storage
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let released = storage.release();
        debug!(released, "queue destroyed");
        released
    }

    /// Whether any entry carries `key` as its primary key.
    pub fn contains(&self, key: &str) -> bool {
        Self::locate_by_primary_key(&self.storage(), key).is_ok()
    }

    /// Removes the first entry (in storage order, not priority order) whose primary key is `key`.
    pub fn delete_by_primary_key(&self, key: &str) -> Result<Entry<P>> {
        let mut storage = self.storage();
        let position = Self::locate_by_primary_key(&storage, key)?;
        let entry = storage.remove_at(position)?;

        debug!(primary_key = key, priority = entry.priority, "deleted entry");
        Ok(entry)
    }

    /// Sets the priority of the first entry whose primary key is `key`.
    pub fn update_by_primary_key(&self, key: &str, priority: i64) -> Result<()> {
        let mut storage = self.storage();
        let position = Self::locate_by_primary_key(&storage, key)?;
        storage.reprioritize(position, priority)?;

        debug!(primary_key = key, priority, "updated entry priority");
        Ok(())
    }

    /// Sets `priority` on every entry of `group_key` and returns how many entries belong to the
    /// group. An unknown group is not an error, the count is simply `0`.
    ///
    /// All members are updated in one pass and the heap is rebuilt afterwards, so no position
    /// collected during the scan is relied upon. O(n)
    pub fn update_priority_by_group_key(&self, group_key: &str, priority: i64) -> usize {
        let matched = self
            .storage()
            .reprioritize_where(|e| e.group_key == group_key, priority);

        debug!(group_key, priority, matched, "updated group priority");
        matched
    }

    /// Removes every entry of `group_key` and returns how many were removed. O(n)
    pub fn delete_by_group_key(&self, group_key: &str) -> Result<usize> {
        let removed = self.storage().remove_where(|e| e.group_key == group_key);

        debug!(group_key, removed, "deleted group");
        Ok(removed)
    }

    fn locate_by_primary_key(storage: &Heap<P>, key: &str) -> Result<usize> {
        storage
            .locate(|e| e.primary_key == key)
            .ok_or_else(|| QueueError::NotFound {
                key: key.to_string(),
            })
    }
}

impl<P> Default for PriorityQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<P> PriorityQueue<P> {
    pub(crate) fn assert_invariants(&self) {
        self.storage().assert_invariants();
    }
}
