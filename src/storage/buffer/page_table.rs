//! Extendible hash table used by the buffer pool as its page table.
//!
//! A directory of 2^g slots points into a slab of buckets, each with a local
//! depth d <= g. Two slots alias the same bucket exactly when they agree on
//! the low d bits of the hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

struct Bucket<K, V> {
    items: Vec<(K, V)>,
    depth: usize,
}

impl<K: PartialEq, V> Bucket<K, V> {
    fn new(capacity: usize, depth: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            depth,
        }
    }

    fn is_full(&self, bucket_size: usize) -> bool {
        self.items.len() >= bucket_size
    }
}

struct TableState<K, V> {
    global_depth: usize,
    bucket_size: usize,
    /// Directory slot -> bucket slab index. Multiple slots may share a bucket.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Dynamic hash table with O(1) lookups; all operations are serialized by a
/// single internal mutex.
pub struct ExtendibleHashTable<K, V> {
    state: Mutex<TableState<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            state: Mutex::new(TableState {
                global_depth: 0,
                bucket_size,
                dir: vec![0],
                buckets: vec![Bucket::new(bucket_size, 0)],
            }),
        }
    }

    fn hash(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let idx = Self::hash(key) & ((1 << state.global_depth) - 1);
        let bucket = &state.buckets[state.dir[idx]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert the pair, overwriting any existing value for the key. Splits
    /// the target bucket (doubling the directory when local depth has caught
    /// up with global depth) until the insert fits.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        loop {
            let idx = Self::hash(&key) & ((1 << state.global_depth) - 1);
            let slab = state.dir[idx];
            let bucket_size = state.bucket_size;
            let bucket = &mut state.buckets[slab];

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if !bucket.is_full(bucket_size) {
                bucket.items.push((key, value));
                return;
            }

            Self::split_bucket(&mut state, idx);
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let idx = Self::hash(key) & ((1 << state.global_depth) - 1);
        let slab = state.dir[idx];
        let bucket = &mut state.buckets[slab];
        let before = bucket.items.len();
        bucket.items.retain(|(k, _)| k != key);
        before != bucket.items.len()
    }

    pub fn global_depth(&self) -> usize {
        self.state.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let state = self.state.lock();
        state.buckets[state.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Split the bucket behind directory slot `idx`: bump its depth,
    /// redistribute its entries by the new depth bit, and repoint every
    /// directory slot that shares the relevant hash suffix.
    fn split_bucket(state: &mut TableState<K, V>, idx: usize) {
        let slab = state.dir[idx];
        if state.buckets[slab].depth == state.global_depth {
            // Double the directory; every new slot aliases its low-half twin.
            state.global_depth += 1;
            let half = state.dir.len();
            for i in 0..half {
                let target = state.dir[i];
                state.dir.push(target);
            }
        }

        let depth = state.buckets[slab].depth + 1;
        let mask = (1 << depth) - 1;
        let low_suffix = idx & ((1 << (depth - 1)) - 1);
        let high_suffix = low_suffix | (1 << (depth - 1));

        let items = std::mem::take(&mut state.buckets[slab].items);
        let mut low = Bucket::new(state.bucket_size, depth);
        let mut high = Bucket::new(state.bucket_size, depth);
        for (k, v) in items {
            if Self::hash(&k) & mask == low_suffix {
                low.items.push((k, v));
            } else {
                high.items.push((k, v));
            }
        }

        // The old slab slot takes the low half; the high half gets a new slot.
        state.buckets[slab] = low;
        state.buckets.push(high);
        let high_slab = state.buckets.len() - 1;

        for i in 0..state.dir.len() {
            if i & mask == high_suffix {
                state.dir[i] = high_slab;
            } else if i & mask == low_suffix {
                state.dir[i] = slab;
            }
        }
    }
}
