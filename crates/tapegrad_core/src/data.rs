use dashmap::{
    mapref::one::{Ref, RefMut},
    DashMap,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opaque handle connecting a tensor to backend-owned storage.
///
/// Ids come from one process-wide counter, so a handle stays unique when its
/// data migrates between backends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub usize);
static DATA_COUNTER: AtomicUsize = AtomicUsize::new(1);
#[inline]
pub fn next_data_id() -> DataId {
    DataId(DATA_COUNTER.fetch_add(1, Ordering::SeqCst))
}

// ────────────────────────────────────────────────────────────────────────────
//  Data store
// ────────────────────────────────────────────────────────────────────────────

/// Handle → backend entry bookkeeping.
///
/// No shape or dtype validation happens here. Entries never migrate on their
/// own: a missing handle is reported as missing and the engine decides whether
/// to move the data in.
pub struct DataStore<T> {
    entries: DashMap<DataId, T>,
    count: AtomicUsize,
}

impl<T> Default for DataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DataStore<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_capacity_and_shard_amount(1 << 10, 16),
            count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, data_id: DataId) -> Option<Ref<'_, DataId, T>> {
        self.entries.get(&data_id)
    }

    pub fn get_mut(&self, data_id: DataId) -> Option<RefMut<'_, DataId, T>> {
        self.entries.get_mut(&data_id)
    }

    pub fn has(&self, data_id: DataId) -> bool {
        self.entries.contains_key(&data_id)
    }

    pub fn set(&self, data_id: DataId, entry: T) {
        if self.entries.insert(data_id, entry).is_none() {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn delete(&self, data_id: DataId) -> Option<T> {
        let removed = self.entries.remove(&data_id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn num_data_ids(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn data_ids(&self) -> Vec<DataId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.count.store(0, Ordering::SeqCst);
    }
}
