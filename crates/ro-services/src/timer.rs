//! Session timer wheel
//!
//! An indexed binary min-heap of absolute deadlines behind one lock. Each
//! key is linked at most once; the position index makes removal and
//! rescheduling O(log n). Entries with equal deadlines keep insertion order.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use ro_core::{ChargingError, Clock};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Timer wheel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer already linked for {0}")]
    AlreadyLinked(String),
}

impl From<TimerError> for ChargingError {
    fn from(err: TimerError) -> Self {
        ChargingError::Timer(err.to_string())
    }
}

/// Result of unlinking a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The timer was pending and is now unlinked
    Removed,
    /// No timer was pending for the key
    NotLinked,
    /// The index pointed at another entry; the stale index was dropped
    Inconsistent,
}

#[derive(Debug, Clone)]
struct TimerEntry<K> {
    deadline: DateTime<Utc>,
    seq: u64,
    key: K,
}

impl<K> TimerEntry<K> {
    fn before(&self, other: &Self) -> bool {
        (self.deadline, self.seq) < (other.deadline, other.seq)
    }
}

struct TimerHeap<K> {
    entries: Vec<TimerEntry<K>>,
    positions: HashMap<K, usize>,
    next_seq: u64,
}

impl<K: Copy + Eq + Hash> TimerHeap<K> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            next_seq: 0,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].key, a);
        self.positions.insert(self.entries[b].key, b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.entries[idx].before(&self.entries[parent]) {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.entries[left].before(&self.entries[smallest]) {
                smallest = left;
            }
            if right < len && self.entries[right].before(&self.entries[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn push(&mut self, key: K, deadline: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let idx = self.entries.len();
        self.entries.push(TimerEntry { deadline, seq, key });
        self.positions.insert(key, idx);
        self.sift_up(idx);
    }

    fn remove_at(&mut self, idx: usize) -> Option<TimerEntry<K>> {
        let last = self.entries.len().checked_sub(1)?;
        if idx != last {
            self.swap(idx, last);
        }
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.key);
        if idx < self.entries.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some(entry)
    }
}

/// Deadline-ordered timers for sessions
pub struct TimerWheel<K> {
    clock: Arc<dyn Clock>,
    heap: Mutex<TimerHeap<K>>,
}

impl<K: Copy + Eq + Hash + Debug> TimerWheel<K> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            heap: Mutex::new(TimerHeap::new()),
        }
    }

    /// Link `key` to fire `delay_secs` from now; negative delays fire on the next sweep
    pub fn insert(&self, key: K, delay_secs: i64) -> Result<DateTime<Utc>, TimerError> {
        let deadline = self.clock.now() + Duration::seconds(delay_secs.max(0));
        let mut heap = self.heap.lock();
        if heap.positions.contains_key(&key) {
            return Err(TimerError::AlreadyLinked(format!("{:?}", key)));
        }
        heap.push(key, deadline);
        Ok(deadline)
    }

    pub fn remove(&self, key: K) -> RemoveOutcome {
        let mut heap = self.heap.lock();
        Self::remove_locked(&mut heap, key)
    }

    fn remove_locked(heap: &mut TimerHeap<K>, key: K) -> RemoveOutcome {
        let Some(&idx) = heap.positions.get(&key) else {
            return RemoveOutcome::NotLinked;
        };
        if idx >= heap.entries.len() || heap.entries[idx].key != key {
            error!(key = ?key, index = idx, "Timer index out of sync with heap");
            heap.positions.remove(&key);
            return RemoveOutcome::Inconsistent;
        }
        heap.remove_at(idx);
        RemoveOutcome::Removed
    }

    /// Reschedule `key`, linking it if it was not pending
    pub fn update(&self, key: K, delay_secs: i64) -> DateTime<Utc> {
        let deadline = self.clock.now() + Duration::seconds(delay_secs.max(0));
        let mut heap = self.heap.lock();
        Self::remove_locked(&mut heap, key);
        heap.push(key, deadline);
        deadline
    }

    /// Detach every timer due at `now`, earliest first
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<K> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.entries.first().map_or(false, |e| e.deadline <= now) {
            match heap.remove_at(0) {
                Some(entry) => due.push(entry.key),
                None => break,
            }
        }
        due
    }

    /// Detach every timer due according to the wheel's clock
    pub fn sweep_due(&self) -> Vec<K> {
        self.sweep(self.clock.now())
    }

    pub fn contains(&self, key: K) -> bool {
        self.heap.lock().positions.contains_key(&key)
    }

    pub fn deadline_of(&self, key: K) -> Option<DateTime<Utc>> {
        let heap = self.heap.lock();
        heap.positions
            .get(&key)
            .and_then(|&idx| heap.entries.get(idx))
            .map(|e| e.deadline)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().entries.first().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of pending timers in firing order
    pub fn pending(&self) -> Vec<(K, DateTime<Utc>)> {
        let heap = self.heap.lock();
        let mut entries: Vec<_> = heap.entries.iter().map(|e| (e.deadline, e.seq, e.key)).collect();
        entries.sort_by_key(|&(deadline, seq, _)| (deadline, seq));
        entries.into_iter().map(|(deadline, _, key)| (key, deadline)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use ro_core::ManualClock;

    fn wheel<K: Copy + Eq + Hash + Debug>() -> (Arc<ManualClock>, TimerWheel<K>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let wheel = TimerWheel::new(clock.clone());
        (clock, wheel)
    }

    #[test]
    fn test_insert_rejects_linked_key() {
        let (_, wheel) = wheel::<u32>();
        wheel.insert(1, 10).unwrap();
        assert!(matches!(wheel.insert(1, 5), Err(TimerError::AlreadyLinked(_))));
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn test_remove_outcomes() {
        let (_, wheel) = wheel();
        wheel.insert(7, 10).unwrap();
        assert_eq!(wheel.remove(7), RemoveOutcome::Removed);
        assert_eq!(wheel.remove(7), RemoveOutcome::NotLinked);
        assert!(wheel.is_empty());
    }

    #[test]
    fn test_sweep_returns_due_in_order() {
        let (clock, wheel) = wheel();
        wheel.insert(3, 30).unwrap();
        wheel.insert(1, 10).unwrap();
        wheel.insert(2, 20).unwrap();
        wheel.insert(4, 20).unwrap();

        clock.advance_secs(20);
        assert_eq!(wheel.sweep_due(), vec![1, 2, 4]);
        assert_eq!(wheel.pending().len(), 1);
        assert!(wheel.contains(3));
    }

    #[test]
    fn test_update_moves_deadline() {
        let (clock, wheel) = wheel();
        wheel.insert(1, 10).unwrap();
        wheel.insert(2, 20).unwrap();
        let deadline = wheel.update(1, 30);

        assert_eq!(wheel.deadline_of(1), Some(deadline));
        assert_eq!(wheel.pending().first().map(|p| p.0), Some(2));
        clock.advance_secs(25);
        assert_eq!(wheel.sweep_due(), vec![2]);
        assert_eq!(wheel.deadline_of(1), wheel.next_deadline());
    }

    #[test]
    fn test_negative_delay_fires_immediately() {
        let (clock, wheel) = wheel();
        wheel.insert(9, -5).unwrap();
        assert_eq!(wheel.sweep(clock.now()), vec![9]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, u16),
        Remove(u8),
        Update(u8, u16),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..32, 0u16..500).prop_map(|(k, d)| Op::Insert(k, d)),
            (0u8..32).prop_map(Op::Remove),
            (0u8..32, 0u16..500).prop_map(|(k, d)| Op::Update(k, d)),
        ]
    }

    proptest! {
        #[test]
        fn prop_sweep_is_exact_and_ordered(ops in proptest::collection::vec(op(), 1..200), cut in 0i64..500) {
            let (clock, wheel) = wheel::<u8>();
            let start = clock.now();
            let mut model: HashMap<u8, i64> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(k, d) => {
                        let inserted = wheel.insert(k, i64::from(d)).is_ok();
                        prop_assert_eq!(inserted, !model.contains_key(&k));
                        model.entry(k).or_insert(i64::from(d));
                    }
                    Op::Remove(k) => {
                        let outcome = wheel.remove(k);
                        let expected = if model.remove(&k).is_some() {
                            RemoveOutcome::Removed
                        } else {
                            RemoveOutcome::NotLinked
                        };
                        prop_assert_eq!(outcome, expected);
                    }
                    Op::Update(k, d) => {
                        wheel.update(k, i64::from(d));
                        model.insert(k, i64::from(d));
                    }
                }

                let pending = wheel.pending();
                prop_assert!(pending.windows(2).all(|w| w[0].1 <= w[1].1));
                prop_assert_eq!(pending.len(), model.len());
            }

            let swept = wheel.sweep(start + Duration::seconds(cut));
            let deadlines: Vec<i64> = swept.iter().map(|k| model[k]).collect();
            prop_assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(deadlines.iter().all(|&d| d <= cut));
            let expected_due = model.values().filter(|&&d| d <= cut).count();
            prop_assert_eq!(swept.len(), expected_due);
            prop_assert!(wheel.pending().iter().all(|(k, _)| model[k] > cut));
        }
    }
}
