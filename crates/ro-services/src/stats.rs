//! Charging statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use ro_diameter::CcRequestType;

/// Engine-wide counters, updated lock-free from any task
#[derive(Debug, Default)]
pub struct ChargingStats {
    initial_sent: AtomicU64,
    initial_successful: AtomicU64,
    initial_failed: AtomicU64,
    interim_sent: AtomicU64,
    interim_successful: AtomicU64,
    interim_failed: AtomicU64,
    final_sent: AtomicU64,
    final_successful: AtomicU64,
    final_failed: AtomicU64,
    ccr_timeouts: AtomicU64,
    replies_received: AtomicU64,
    response_time_ms: AtomicU64,
    slow_answers: AtomicU64,
    billed_secs: AtomicU64,
    active_sessions: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub initial_sent: u64,
    pub initial_successful: u64,
    pub initial_failed: u64,
    pub interim_sent: u64,
    pub interim_successful: u64,
    pub interim_failed: u64,
    pub final_sent: u64,
    pub final_successful: u64,
    pub final_failed: u64,
    pub ccr_timeouts: u64,
    pub replies_received: u64,
    pub response_time_ms: u64,
    /// Answers slower than the configured threshold
    pub slow_answers: u64,
    pub billed_secs: u64,
    pub active_sessions: u64,
}

impl StatsSnapshot {
    /// Mean time to receive an answer
    pub fn average_response_ms(&self) -> Option<u64> {
        (self.replies_received > 0).then(|| self.response_time_ms / self.replies_received)
    }
}

impl ChargingStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, kind: CcRequestType) -> (&AtomicU64, &AtomicU64, &AtomicU64) {
        match kind {
            CcRequestType::Initial | CcRequestType::Event => {
                (&self.initial_sent, &self.initial_successful, &self.initial_failed)
            }
            CcRequestType::Update => {
                (&self.interim_sent, &self.interim_successful, &self.interim_failed)
            }
            CcRequestType::Termination => {
                (&self.final_sent, &self.final_successful, &self.final_failed)
            }
        }
    }

    pub fn record_sent(&self, kind: CcRequestType) {
        self.counters(kind).0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, kind: CcRequestType, success: bool) {
        let (_, ok, failed) = self.counters(kind);
        if success {
            ok.fetch_add(1, Ordering::Relaxed);
        } else {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.ccr_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply(&self, elapsed_ms: u64) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        self.response_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_slow_answer(&self) {
        self.slow_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_billed(&self, secs: i64) {
        if secs > 0 {
            self.billed_secs.fetch_add(secs as u64, Ordering::Relaxed);
        }
    }

    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            initial_sent: load(&self.initial_sent),
            initial_successful: load(&self.initial_successful),
            initial_failed: load(&self.initial_failed),
            interim_sent: load(&self.interim_sent),
            interim_successful: load(&self.interim_successful),
            interim_failed: load(&self.interim_failed),
            final_sent: load(&self.final_sent),
            final_successful: load(&self.final_successful),
            final_failed: load(&self.final_failed),
            ccr_timeouts: load(&self.ccr_timeouts),
            replies_received: load(&self.replies_received),
            response_time_ms: load(&self.response_time_ms),
            slow_answers: load(&self.slow_answers),
            billed_secs: load(&self.billed_secs),
            active_sessions: load(&self.active_sessions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_request_type() {
        let stats = ChargingStats::new();
        stats.record_sent(CcRequestType::Initial);
        stats.record_outcome(CcRequestType::Initial, true);
        stats.record_sent(CcRequestType::Update);
        stats.record_outcome(CcRequestType::Update, false);
        stats.record_timeout();
        stats.record_reply(40);
        stats.record_reply(20);
        stats.record_slow_answer();
        stats.record_billed(30);
        stats.record_billed(-3);

        let snap = stats.snapshot();
        assert_eq!(snap.initial_sent, 1);
        assert_eq!(snap.initial_successful, 1);
        assert_eq!(snap.interim_failed, 1);
        assert_eq!(snap.ccr_timeouts, 1);
        assert_eq!(snap.average_response_ms(), Some(30));
        assert_eq!(snap.slow_answers, 1);
        assert_eq!(snap.billed_secs, 30);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let stats = ChargingStats::new();
        stats.session_ended();
        stats.session_started();
        stats.session_ended();
        stats.session_ended();
        assert_eq!(stats.snapshot().active_sessions, 0);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["active_sessions"], 0);
    }
}
