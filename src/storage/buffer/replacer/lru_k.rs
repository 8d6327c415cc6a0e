//! LRU-K replacement policy.
//!
//! Every frame carries the timestamps of its last K accesses. The frame with
//! the greatest backward K-distance is evicted; frames with fewer than K
//! recorded accesses count as infinitely distant and are preferred, ordered
//! among themselves by their earliest recorded access (classical LRU).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::types::FrameId;

struct FrameRecord {
    /// Last K access timestamps, oldest first.
    history: VecDeque<u64>,
    evictable: bool,
    /// True once the frame has been accessed since it was last cleared.
    live: bool,
}

impl FrameRecord {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            evictable: false,
            live: false,
        }
    }

    fn clear(&mut self) {
        self.history.clear();
        self.evictable = false;
        self.live = false;
    }
}

struct ReplacerState {
    frames: Vec<FrameRecord>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// Tracks up to a fixed number of frames; all operations are serialized by a
/// single internal mutex, so concurrent `record_access` calls observe a total
/// order of timestamps.
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        let mut frames = Vec::with_capacity(num_frames);
        frames.resize_with(num_frames, || FrameRecord::new(k));
        Self {
            state: Mutex::new(ReplacerState {
                frames,
                current_timestamp: 0,
                evictable_count: 0,
            }),
            k,
        }
    }

    /// Record an access to the frame, keeping at most the last K timestamps.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        assert!(frame_id < state.frames.len(), "frame id out of range");
        state.current_timestamp += 1;
        let now = state.current_timestamp;
        let k = self.k;
        let frame = &mut state.frames[frame_id];
        frame.live = true;
        frame.history.push_back(now);
        if frame.history.len() > k {
            frame.history.pop_front();
        }
    }

    /// Toggle evictability. A frame that has never been accessed since its
    /// last clear is silently ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        assert!(frame_id < state.frames.len(), "frame id out of range");
        let frame = &mut state.frames[frame_id];
        if !frame.live || frame.evictable == evictable {
            return;
        }
        frame.evictable = evictable;
        if evictable {
            state.evictable_count += 1;
        } else {
            state.evictable_count -= 1;
        }
    }

    /// Pick the evictable frame with the greatest backward K-distance and
    /// clear its record. Returns None when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let mut victim: Option<FrameId> = None;
        let mut victim_sub_k = false;
        let mut victim_ts = u64::MAX;
        for (frame_id, frame) in state.frames.iter().enumerate() {
            if !frame.live || !frame.evictable {
                continue;
            }
            let sub_k = frame.history.len() < self.k;
            // Sub-K frames rank as infinitely distant; among them the one
            // with the oldest first access wins. Otherwise the oldest Kth
            // most recent access (the history front) wins.
            let ts = *frame.history.front().expect("live frame has history");
            let better = match (sub_k, victim_sub_k) {
                (true, false) => true,
                (false, true) => false,
                _ => ts < victim_ts,
            };
            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_sub_k = sub_k;
                victim_ts = ts;
            }
        }

        if let Some(frame_id) = victim {
            state.frames[frame_id].clear();
            state.evictable_count -= 1;
        }
        victim
    }

    /// Drop a frame's record entirely. The frame must be evictable; removing
    /// a pinned frame is a caller bug and aborts.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        assert!(frame_id < state.frames.len(), "frame id out of range");
        let frame = &mut state.frames[frame_id];
        if !frame.live {
            return;
        }
        assert!(frame.evictable, "removing a non-evictable frame");
        frame.clear();
        state.evictable_count -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_basic_eviction_order() {
        let replacer = LruKReplacer::new(7, 2);

        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(3);
        replacer.record_access(4);
        replacer.record_access(5);
        replacer.record_access(6);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        replacer.set_evictable(5, true);
        replacer.set_evictable(6, false);
        assert_eq!(replacer.size(), 5);

        // Frame 1 gets a second access; the remaining sub-K frames go first,
        // oldest first.
        replacer.record_access(1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.size(), 2);

        replacer.record_access(3);
        replacer.record_access(4);
        replacer.record_access(5);
        replacer.record_access(4);
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        assert_eq!(replacer.size(), 4);

        // 3 is the only sub-K frame left.
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(6, true);
        assert_eq!(replacer.size(), 4);
        assert_eq!(replacer.evict(), Some(6));

        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(5));

        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 2);

        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_one_degenerates_to_lru() {
        let replacer = LruKReplacer::new(4, 1);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);

        // Re-access 0; LRU order becomes 1, 2, 0.
        replacer.record_access(0);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_lru_k_double_access_outlives_newer_single() {
        // With K=2, a frame accessed twice in a row is evicted after a
        // singly-accessed frame even if that frame is newer.
        let replacer = LruKReplacer::new(3, 2);
        replacer.record_access(0);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_lru_k_scenario_n3_k2() {
        // Accesses 1,2,3,1,2 with all evictable: 3 is sub-K and goes first,
        // then 1 (its 2nd-most-recent access is the oldest).
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(3);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);

        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn test_set_evictable_on_untracked_frame_is_noop() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.set_evictable(3, true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_pinned_frame_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.remove(1);
    }

    #[test]
    fn test_remove_clears_history() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        replacer.remove(1);
        assert_eq!(replacer.size(), 0);

        // Untracked again after removal.
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 0);
    }
}
