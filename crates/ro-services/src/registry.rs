//! Session registry
//!
//! Sessions are stored in a slot arena split across a bounded set of
//! locks. A fixed, power-of-two number of buckets chains sessions by dialog
//! entry; bucket `b` is guarded by lock `b % lock_count`. Handles carry the
//! slot generation, so a handle to a destroyed session never resolves to
//! the slot's next occupant.
//!
//! Reference counting: the creator holds one reference until it links or
//! abandons the session, the registration holds one while the session is
//! linked, an armed timer holds one, and every in-flight exchange or lookup
//! guard holds one. The session is destroyed exactly when the count drops to
//! zero, under the bucket lock.
//!
//! Lock order: a bucket lock may take the timer wheel lock, never the
//! reverse.

use parking_lot::{Mutex, MutexGuard};
use ro_core::models::{ChargingSession, Direction, RoutingKeys, SessionParams};
use ro_core::{ChargingError, ChargingResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::timer::{RemoveOutcome, TimerError, TimerWheel};

/// Generation-checked reference to a session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    bucket: u32,
    index: u32,
    generation: u32,
}

impl SessionHandle {
    pub fn bucket(&self) -> u32 {
        self.bucket
    }
}

struct SessionEntry {
    session: ChargingSession,
    refs: u32,
    linked: bool,
    registered: bool,
}

struct Slot {
    generation: u32,
    entry: Option<SessionEntry>,
}

#[derive(Default)]
struct Shard {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// bucket id -> slot indices chained in that bucket
    chains: HashMap<u32, Vec<u32>>,
}

impl Shard {
    fn entry_mut(&mut self, handle: SessionHandle) -> Option<&mut SessionEntry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn allocate(&mut self, entry: SessionEntry) -> (u32, u32) {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                (index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ((self.slots.len() - 1) as u32, 0)
            }
        }
    }
}

/// Bucketed, reference-counted session storage
pub struct SessionRegistry {
    shards: Vec<Mutex<Shard>>,
    bucket_count: u32,
    max_sessions: usize,
    count: AtomicUsize,
    timers: Arc<TimerWheel<SessionHandle>>,
}

impl SessionRegistry {
    /// `bucket_count` is rounded up to a power of two; `max_sessions` of 0 means unlimited
    pub fn new(
        bucket_count: usize,
        lock_count: usize,
        max_sessions: usize,
        timers: Arc<TimerWheel<SessionHandle>>,
    ) -> Self {
        let bucket_count = bucket_count.max(1).next_power_of_two();
        let lock_count = lock_count.clamp(1, bucket_count);
        Self {
            shards: (0..lock_count).map(|_| Mutex::new(Shard::default())).collect(),
            bucket_count: bucket_count as u32,
            max_sessions,
            count: AtomicUsize::new(0),
            timers,
        }
    }

    pub fn bucket_of(&self, dialog_entry: u32) -> u32 {
        dialog_entry & (self.bucket_count - 1)
    }

    fn shard(&self, bucket: u32) -> MutexGuard<'_, Shard> {
        self.shards[bucket as usize % self.shards.len()].lock()
    }

    /// Number of live sessions, linked or not
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timers(&self) -> &Arc<TimerWheel<SessionHandle>> {
        &self.timers
    }

    /// Allocate an unlinked session holding the creator's reference
    pub fn create(&self, params: SessionParams, now: DateTime<Utc>) -> ChargingResult<SessionHandle> {
        self.insert_entry(ChargingSession::new(params, now))
    }

    fn insert_entry(&self, session: ChargingSession) -> ChargingResult<SessionHandle> {
        let reserved = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (self.max_sessions == 0 || n < self.max_sessions).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(ChargingError::AllocationFailure(format!(
                "session limit {} reached",
                self.max_sessions
            )));
        }

        let bucket = self.bucket_of(session.routing.dialog_entry);
        let mut shard = self.shard(bucket);
        let (index, generation) = shard.allocate(SessionEntry {
            session,
            refs: 1,
            linked: false,
            registered: false,
        });
        Ok(SessionHandle {
            bucket,
            index,
            generation,
        })
    }

    /// Chain the session into its bucket; takes the registration reference plus `extra_refs`
    pub fn link(&self, handle: SessionHandle, extra_refs: u32) -> ChargingResult<()> {
        let mut shard = self.shard(handle.bucket);
        let entry = shard
            .entry_mut(handle)
            .ok_or_else(|| ChargingError::SessionNotFound(format!("{:?}", handle)))?;
        if entry.linked {
            return Err(ChargingError::InconsistentState(format!(
                "session {} linked twice",
                entry.session.session_id
            )));
        }
        entry.linked = true;
        entry.registered = true;
        entry.refs += 1 + extra_refs;
        shard.chains.entry(handle.bucket).or_default().push(handle.index);
        Ok(())
    }

    /// Re-insert a session loaded from the store, linked and holding only its registration
    pub fn restore(&self, session: ChargingSession) -> ChargingResult<SessionHandle> {
        let handle = self.insert_entry(session)?;
        self.link(handle, 0)?;
        self.unref(handle, 1);
        Ok(handle)
    }

    /// Run `f` on the session under its bucket lock
    ///
    /// Returns `None` for a stale handle. References released through the
    /// `SessionMut` are applied after `f` returns, and the session is
    /// destroyed if none remain.
    pub fn with_session<R>(&self, handle: SessionHandle, f: impl FnOnce(&mut SessionMut<'_>) -> R) -> Option<R> {
        let mut shard = self.shard(handle.bucket);
        let entry = shard.entry_mut(handle)?;
        let mut guard = SessionMut {
            handle,
            entry,
            timers: &self.timers,
            released: 0,
        };
        let result = f(&mut guard);
        let released = guard.released;
        if released > 0 {
            self.release_locked(&mut shard, handle, released);
        }
        Some(result)
    }

    /// Take `n` references
    pub fn ref_session(&self, handle: SessionHandle, n: u32) -> bool {
        let mut shard = self.shard(handle.bucket);
        match shard.entry_mut(handle) {
            Some(entry) => {
                entry.refs += n;
                true
            }
            None => false,
        }
    }

    /// Drop `n` references; returns the remaining count, `Some(0)` when the session was destroyed
    pub fn unref(&self, handle: SessionHandle, n: u32) -> Option<u32> {
        let mut shard = self.shard(handle.bucket);
        self.release_locked(&mut shard, handle, n)
    }

    fn release_locked(&self, shard: &mut Shard, handle: SessionHandle, n: u32) -> Option<u32> {
        let entry = shard.entry_mut(handle)?;
        if n > entry.refs {
            error!(
                session_id = %entry.session.session_id,
                refs = entry.refs,
                release = n,
                "Reference count underflow"
            );
        }
        entry.refs = entry.refs.saturating_sub(n);
        let remaining = entry.refs;
        if remaining == 0 {
            self.destroy_locked(shard, handle);
        }
        Some(remaining)
    }

    fn destroy_locked(&self, shard: &mut Shard, handle: SessionHandle) {
        let slot = &mut shard.slots[handle.index as usize];
        let Some(entry) = slot.entry.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);

        if entry.linked {
            if let Some(chain) = shard.chains.get_mut(&handle.bucket) {
                chain.retain(|&i| i != handle.index);
                if chain.is_empty() {
                    shard.chains.remove(&handle.bucket);
                }
            }
        }
        if self.timers.remove(handle) == RemoveOutcome::Removed {
            error!(
                session_id = %entry.session.session_id,
                "Destroyed session still had a pending timer"
            );
        }
        shard.free.push(handle.index);
        self.count.fetch_sub(1, Ordering::AcqRel);
        debug!(session_id = %entry.session.session_id, "Session destroyed");
    }

    fn find_in_bucket(
        &self,
        dialog_entry: u32,
        matches: impl Fn(&ChargingSession) -> bool,
    ) -> Option<SessionHandle> {
        let bucket = self.bucket_of(dialog_entry);
        let mut shard = self.shard(bucket);
        let indices = shard.chains.get(&bucket)?.clone();
        for index in indices {
            let slot = &mut shard.slots[index as usize];
            let generation = slot.generation;
            if let Some(entry) = slot.entry.as_mut() {
                if matches(&entry.session) {
                    entry.refs += 1;
                    return Some(SessionHandle {
                        bucket,
                        index,
                        generation,
                    });
                }
            }
        }
        None
    }

    /// Find a linked session by call id; `direction` of `None` matches either leg
    pub fn lookup(
        self: &Arc<Self>,
        dialog_entry: u32,
        call_id: &str,
        direction: Option<Direction>,
    ) -> Option<RefGuard> {
        self.find_in_bucket(dialog_entry, |s| {
            s.call_id == call_id && direction.map_or(true, |d| s.direction == d)
        })
        .map(|handle| RefGuard::new(Arc::clone(self), handle))
    }

    /// Find a linked session by dialog and leg
    pub fn lookup_dialog(self: &Arc<Self>, routing: RoutingKeys, direction: Direction) -> Option<RefGuard> {
        self.find_in_bucket(routing.dialog_entry, |s| {
            s.routing == routing && s.direction == direction
        })
        .map(|handle| RefGuard::new(Arc::clone(self), handle))
    }

    /// Reference count of a live session
    pub fn refs(&self, handle: SessionHandle) -> Option<u32> {
        let mut shard = self.shard(handle.bucket);
        shard.entry_mut(handle).map(|e| e.refs)
    }

    /// Copies of every registered session
    pub fn snapshot_all(&self) -> Vec<(SessionHandle, ChargingSession)> {
        let mut sessions = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            for (index, slot) in shard.slots.iter().enumerate() {
                if let Some(entry) = slot.entry.as_ref().filter(|e| e.registered) {
                    let handle = SessionHandle {
                        bucket: self.bucket_of(entry.session.routing.dialog_entry),
                        index: index as u32,
                        generation: slot.generation,
                    };
                    sessions.push((handle, entry.session.clone()));
                }
            }
        }
        sessions
    }
}

/// Mutable access to a session under its bucket lock
pub struct SessionMut<'a> {
    handle: SessionHandle,
    entry: &'a mut SessionEntry,
    timers: &'a TimerWheel<SessionHandle>,
    released: u32,
}

impl SessionMut<'_> {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// References currently held, not counting releases pending on this guard
    pub fn refs(&self) -> u32 {
        self.entry.refs.saturating_sub(self.released)
    }

    pub fn retain(&mut self, n: u32) {
        self.entry.refs += n;
    }

    /// Release `n` references once the closure returns
    pub fn release(&mut self, n: u32) {
        self.released += n;
    }

    pub fn is_armed(&self) -> bool {
        self.timers.contains(self.handle)
    }

    /// Arm the session timer; the timer holds a reference until it fires or is disarmed
    pub fn arm(&mut self, delay_secs: i64) -> Result<DateTime<Utc>, TimerError> {
        let deadline = self.timers.insert(self.handle, delay_secs)?;
        self.entry.refs += 1;
        Ok(deadline)
    }

    /// Unlink the session timer, dropping its reference when it was pending
    pub fn disarm(&mut self) -> RemoveOutcome {
        let outcome = self.timers.remove(self.handle);
        if outcome == RemoveOutcome::Removed {
            self.release(1);
        }
        outcome
    }

    /// Drop the registration reference; false when it was already released
    pub fn release_registration(&mut self) -> bool {
        if !self.entry.registered {
            return false;
        }
        self.entry.registered = false;
        self.release(1);
        true
    }

    pub fn is_registered(&self) -> bool {
        self.entry.registered
    }
}

impl Deref for SessionMut<'_> {
    type Target = ChargingSession;

    fn deref(&self) -> &ChargingSession {
        &self.entry.session
    }
}

impl DerefMut for SessionMut<'_> {
    fn deref_mut(&mut self) -> &mut ChargingSession {
        &mut self.entry.session
    }
}

/// Counted reference obtained from a lookup, released on drop
pub struct RefGuard {
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
    held: bool,
}

impl RefGuard {
    fn new(registry: Arc<SessionRegistry>, handle: SessionHandle) -> Self {
        Self {
            registry,
            handle,
            held: true,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SessionMut<'_>) -> R) -> Option<R> {
        self.registry.with_session(self.handle, f)
    }

    /// Keep the reference past the guard; the caller must `unref` it
    pub fn into_handle(mut self) -> SessionHandle {
        self.held = false;
        self.handle
    }
}

impl Drop for RefGuard {
    fn drop(&mut self) {
        if self.held {
            self.registry.unref(self.handle, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ro_core::models::PartyIdentities;
    use ro_core::{Clock, ManualClock};

    fn registry(max_sessions: usize) -> (Arc<ManualClock>, Arc<SessionRegistry>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let timers = Arc::new(TimerWheel::new(clock.clone()));
        (clock, Arc::new(SessionRegistry::new(16, 4, max_sessions, timers)))
    }

    fn params(call_id: &str, direction: Direction, dialog_entry: u32) -> SessionParams {
        SessionParams {
            session_id: format!("scscf;1;{}", call_id),
            call_id: call_id.to_string(),
            direction,
            identities: PartyIdentities::new("sip:alice@ims.test", "tel:+15550100"),
            charging_vector: None,
            rating_group: 100,
            service_identifier: 1000,
            routing: RoutingKeys::new(dialog_entry, 1),
            origin_host: "scscf".to_string(),
            auth_app_id: 4,
            auth_session_type: 1,
        }
    }

    #[test]
    fn test_unlinked_session_dies_with_creator_ref() {
        let (clock, reg) = registry(0);
        let handle = reg.create(params("c1", Direction::Originating, 3), clock.now()).unwrap();
        assert_eq!(reg.refs(handle), Some(1));
        assert!(reg.lookup(3, "c1", None).is_none());

        assert_eq!(reg.unref(handle, 1), Some(0));
        assert!(reg.is_empty());
        assert!(reg.with_session(handle, |_| ()).is_none());
    }

    #[test]
    fn test_link_and_lookup() {
        let (clock, reg) = registry(0);
        let handle = reg.create(params("c1", Direction::Terminating, 19), clock.now()).unwrap();
        reg.link(handle, 0).unwrap();
        reg.unref(handle, 1);
        assert_eq!(reg.refs(handle), Some(1));

        {
            let guard = reg.lookup(19, "c1", None).unwrap();
            assert_eq!(guard.handle(), handle);
            assert_eq!(reg.refs(handle), Some(2));
            assert!(reg.lookup(19, "c1", Some(Direction::Originating)).is_none());
        }
        assert_eq!(reg.refs(handle), Some(1));
        assert!(reg.link(handle, 0).is_err());
    }

    #[test]
    fn test_stale_handle_does_not_reach_new_occupant() {
        let (clock, reg) = registry(0);
        let old = reg.create(params("c1", Direction::Originating, 1), clock.now()).unwrap();
        reg.unref(old, 1);
        let new = reg.create(params("c2", Direction::Originating, 1), clock.now()).unwrap();
        assert_ne!(old, new);
        assert!(reg.with_session(old, |_| ()).is_none());
        assert_eq!(reg.with_session(new, |s| s.call_id.clone()), Some("c2".to_string()));
    }

    #[test]
    fn test_allocation_limit() {
        let (clock, reg) = registry(1);
        let _first = reg.create(params("c1", Direction::Originating, 1), clock.now()).unwrap();
        let err = reg.create(params("c2", Direction::Originating, 1), clock.now()).unwrap_err();
        assert!(matches!(err, ChargingError::AllocationFailure(_)));
    }

    #[test]
    fn test_timer_holds_reference() {
        let (clock, reg) = registry(0);
        let handle = reg.create(params("c1", Direction::Originating, 5), clock.now()).unwrap();
        reg.link(handle, 0).unwrap();
        reg.unref(handle, 1);

        reg.with_session(handle, |s| s.arm(10).unwrap()).unwrap();
        assert_eq!(reg.refs(handle), Some(2));
        assert!(reg.timers().contains(handle));

        let outcome = reg.with_session(handle, |s| s.disarm()).unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed);
        assert_eq!(reg.refs(handle), Some(1));
    }

    #[test]
    fn test_release_registration_destroys_and_unchains() {
        let (clock, reg) = registry(0);
        let handle = reg.create(params("c1", Direction::Originating, 5), clock.now()).unwrap();
        reg.link(handle, 0).unwrap();
        reg.unref(handle, 1);

        let released = reg.with_session(handle, |s| {
            let first = s.release_registration();
            let second = s.release_registration();
            (first, second)
        });
        assert_eq!(released, Some((true, false)));
        assert!(reg.is_empty());
        assert!(reg.lookup(5, "c1", None).is_none());
    }

    #[test]
    fn test_destroy_cancels_pending_timer() {
        let (clock, reg) = registry(0);
        let handle = reg.create(params("c1", Direction::Originating, 5), clock.now()).unwrap();
        reg.with_session(handle, |s| s.arm(10).unwrap());
        // Both the creator and the timer reference go at once
        reg.unref(handle, 2);
        assert!(reg.is_empty());
        assert!(!reg.timers().contains(handle));
    }

    #[test]
    fn test_restore_and_snapshot() {
        let (clock, reg) = registry(0);
        let session = ChargingSession::new(params("c9", Direction::Originating, 2), clock.now());
        let handle = reg.restore(session).unwrap();
        assert_eq!(reg.refs(handle), Some(1));

        let snapshot = reg.snapshot_all();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, handle);
        assert_eq!(snapshot[0].1.call_id, "c9");
    }
}
