use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};
use crate::types::FrameId;

/// Frame replacement policy used by the buffer pool. Implementations keep
/// their own interior lock so every operation is linearizable on its own.
pub trait ReplacementStrategy: Send + Sync {
    /// Note an access to the given frame at the current logical time
    fn record_access(&self, frame_id: FrameId);

    /// Mark whether the frame may be evicted. Unknown frames are ignored.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Pick a victim frame and drop all bookkeeping for it
    fn evict(&self) -> Option<FrameId>;

    /// Forget a tracked frame. The frame must be evictable.
    fn remove(&self, frame_id: FrameId);

    /// Number of evictable frames currently tracked
    fn size(&self) -> usize;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementStrategyType {
    LruK { k: usize },
}

pub fn replacement_strategy_factory(
    strategy_type: ReplacementStrategyType,
    num_frames: usize,
) -> Box<dyn ReplacementStrategy> {
    match strategy_type {
        ReplacementStrategyType::LruK { k } => Box::new(LruKReplacer::new(num_frames, k)),
    }
}

struct FrameMeta {
    evictable: bool,
    access_count: usize,
    timestamps: VecDeque<u64>, // at most k most recent access times
}

struct LruKState {
    frames: HashMap<FrameId, FrameMeta>,
    // frames with fewer than k accesses, ordered by first access
    history: LinkedHashMap<FrameId, ()>,
    // frames with at least k accesses, ordered by k-th most recent access
    cache: Vec<FrameId>,
    current_timestamp: u64,
    curr_size: usize,
}

/// LRU-K replacement: the victim is the evictable frame whose k-th most
/// recent access lies farthest in the past. Frames with fewer than k
/// accesses have infinite backward distance and are evicted first, oldest
/// first access winning the tie.
pub struct LruKReplacer {
    num_frames: usize,
    k: usize,
    state: Mutex<LruKState>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        debug_assert!(k > 0);
        LruKReplacer {
            num_frames,
            k,
            state: Mutex::new(LruKState {
                frames: HashMap::new(),
                history: LinkedHashMap::new(),
                cache: Vec::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }
}

impl ReplacementStrategy for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock().unwrap();
        state.current_timestamp += 1; // advance logical clock
        let now = state.current_timestamp;

        assert!(frame_id < self.num_frames, "invalid frame: {}", frame_id);

        // first visit of this frame
        if !state.frames.contains_key(&frame_id) {
            state.curr_size += 1;
            state.history.insert(frame_id, ());
            state.frames.insert(frame_id, FrameMeta {
                evictable: true,
                access_count: 1,
                timestamps: VecDeque::from([now]),
            });
            return;
        }

        let LruKState { frames, history, cache, .. } = &mut *state;
        let meta = frames.get_mut(&frame_id).unwrap();
        meta.access_count += 1;
        meta.timestamps.push_back(now);

        if meta.access_count < self.k {
            // still in the history list, position unchanged
            return;
        }

        if meta.access_count == self.k {
            // graduate from history into the cache list
            history.remove(&frame_id);
        } else {
            // already cached: keep only the k most recent accesses
            meta.timestamps.pop_front();
            let pos = cache.iter().position(|&f| f == frame_id).unwrap();
            cache.remove(pos);
        }

        // keep the cache list sorted by the k-th most recent access
        let pivot = *meta.timestamps.front().unwrap();
        let insert_at = cache.partition_point(|f| {
            *frames[f].timestamps.front().unwrap() < pivot
        });
        cache.insert(insert_at, frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock().unwrap();

        let Some(meta) = state.frames.get_mut(&frame_id) else {
            return;
        };
        let was_evictable = meta.evictable;
        meta.evictable = evictable;

        if !was_evictable && evictable {
            state.curr_size += 1;
        }
        if was_evictable && !evictable {
            state.curr_size -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();

        if state.curr_size == 0 {
            return None;
        }

        // any history frame has infinite backward distance, oldest first
        let victim = state.history.keys()
            .copied()
            .find(|f| state.frames[f].evictable)
            .or_else(|| {
                state.cache.iter()
                    .copied()
                    .find(|f| state.frames[f].evictable)
            })?;

        state.history.remove(&victim);
        if let Some(pos) = state.cache.iter().position(|&f| f == victim) {
            state.cache.remove(pos);
        }
        state.frames.remove(&victim);
        state.curr_size -= 1;
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock().unwrap();

        let Some(meta) = state.frames.get(&frame_id) else {
            return;
        };
        assert!(meta.evictable, "try to remove an unevictable frame: {}", frame_id);

        if meta.access_count >= self.k {
            let pos = state.cache.iter().position(|&f| f == frame_id).unwrap();
            state.cache.remove(pos);
        } else {
            state.history.remove(&frame_id);
        }
        state.frames.remove(&frame_id);
        state.curr_size -= 1;
    }

    fn size(&self) -> usize {
        self.state.lock().unwrap().curr_size
    }
}
