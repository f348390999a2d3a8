use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

struct TableState<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<usize>,          // directory slot -> bucket arena index
    buckets: Vec<Bucket<K, V>>,
    len: usize,
}

/// Directory-based extendible hash map. Buckets live in an arena and the
/// directory holds arena indices, so slots that differ only in bits above
/// a bucket's local depth share one bucket. A split re-routes every slot
/// of that sharing group onto one of two new buckets by the next hash
/// bit; the drained bucket stays in the arena but nothing references it.
///
/// Used as the buffer pool's page table and reusable as a generic map.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    state: Mutex<TableState<K, V>>,
}

impl<K: Hash + Eq, V: Clone> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        debug_assert!(bucket_size > 0);
        ExtendibleHashTable {
            bucket_size,
            state: Mutex::new(TableState {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket { depth: 0, items: Vec::new() }],
                len: 0,
            }),
        }
    }

    // directory slot for a key: the low global-depth bits of its hash
    fn index_of(global_depth: usize, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let mask = (1usize << global_depth) - 1;
        hasher.finish() as usize & mask
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock().unwrap();
        let bucket = &state.buckets[state.dir[Self::index_of(state.global_depth, key)]];
        bucket.items.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock().unwrap();
        let slot = state.dir[Self::index_of(state.global_depth, key)];
        let bucket = &mut state.buckets[slot];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                state.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Insert a pair, overwriting the value of an existing key. A full
    /// target bucket is split (doubling the directory when its local depth
    /// has caught up with the global depth) until the pair fits.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock().unwrap();

        loop {
            let idx = Self::index_of(state.global_depth, &key);
            let slot = state.dir[idx];

            if state.buckets[slot].items.len() < self.bucket_size {
                let bucket = &mut state.buckets[slot];
                match bucket.items.iter_mut().find(|(k, _)| *k == key) {
                    Some(item) => item.1 = value,
                    None => {
                        bucket.items.push((key, value));
                        state.len += 1;
                    }
                }
                return;
            }

            // target bucket is full: double the directory if its local
            // depth has reached the global depth
            if state.buckets[slot].depth == state.global_depth {
                let slots = state.dir.len();
                for i in 0..slots {
                    let shared = state.dir[i];
                    state.dir.push(shared);
                }
                state.global_depth += 1;
            }

            // two fresh buckets take over every directory slot still
            // routed at the full bucket, partitioned by the new depth
            // bit; a slot left pointing at the drained bucket would lose
            // its entries
            let local_depth = state.buckets[slot].depth;
            let first = state.buckets.len();
            state.buckets.push(Bucket { depth: local_depth + 1, items: Vec::new() });
            state.buckets.push(Bucket { depth: local_depth + 1, items: Vec::new() });
            for i in 0..state.dir.len() {
                if state.dir[i] == slot {
                    state.dir[i] = if i & (1 << local_depth) == 0 { first } else { first + 1 };
                }
            }
            state.num_buckets += 1;

            // rehash the drained items; every slot they can map to now
            // points at one of the two new buckets
            let items = std::mem::take(&mut state.buckets[slot].items);
            for (k, v) in items {
                let new_slot = state.dir[Self::index_of(state.global_depth, &k)];
                state.buckets[new_slot].items.push((k, v));
            }
        }
    }

    pub fn get_global_depth(&self) -> usize {
        self.state.lock().unwrap().global_depth
    }

    pub fn get_local_depth(&self, dir_index: usize) -> usize {
        let state = self.state.lock().unwrap();
        state.buckets[state.dir[dir_index]].depth
    }

    pub fn get_num_buckets(&self) -> usize {
        self.state.lock().unwrap().num_buckets
    }

    pub fn get_dir_size(&self) -> usize {
        self.state.lock().unwrap().dir.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
