//! Charging session model
//!
//! A `ChargingSession` is the unit of billing state for one call leg. The
//! registry owns the live instances; this struct is also the snapshot that
//! is persisted and rehydrated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::{ChargingVector, PartyIdentities};

/// Call leg direction as seen by the charging node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Charging the calling party
    Originating,
    /// Charging the called party
    Terminating,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Originating => 0,
            Direction::Terminating => 1,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Direction::Originating),
            1 => Some(Direction::Terminating),
            _ => None,
        }
    }

    /// Parse from the script-facing names
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "orig" | "originating" => Some(Direction::Originating),
            "term" | "terminating" => Some(Direction::Terminating),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Originating => write!(f, "orig"),
            Direction::Terminating => write!(f, "term"),
        }
    }
}

/// Billing lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Reserved but the call is not answered yet
    #[default]
    Pending,
    /// Call answered, credit is being consumed
    Answered,
    /// Last units granted, the next expiry ends the call
    NoMoreCredit,
    /// Charging system unreachable, the next expiry ends the call
    UnknownError,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Answered => "answered",
            SessionState::NoMoreCredit => "no_more_credit",
            SessionState::UnknownError => "unknown_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionState::Pending),
            "answered" => Some(SessionState::Answered),
            "no_more_credit" => Some(SessionState::NoMoreCredit),
            "unknown_error" => Some(SessionState::UnknownError),
            _ => None,
        }
    }

    /// The next timer expiry terminates the call
    pub fn is_degraded(&self) -> bool {
        matches!(self, SessionState::NoMoreCredit | SessionState::UnknownError)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active flag; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState {
    #[default]
    NotYetActive,
    Active,
    Terminated,
}

impl ActiveState {
    pub fn as_i32(&self) -> i32 {
        match self {
            ActiveState::NotYetActive => 0,
            ActiveState::Active => 1,
            ActiveState::Terminated => -1,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ActiveState::Active,
            v if v < 0 => ActiveState::Terminated,
            _ => ActiveState::NotYetActive,
        }
    }
}

/// Pending persistence work for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    #[default]
    Clean,
    New,
    Changed,
    Deleted,
}

impl DirtyState {
    /// Combine pending work: a delete wins, an unwritten insert absorbs updates
    pub fn merge(self, next: DirtyState) -> DirtyState {
        match (self, next) {
            (_, DirtyState::Deleted) | (DirtyState::Deleted, _) => DirtyState::Deleted,
            (DirtyState::New, _) => DirtyState::New,
            (current, DirtyState::Clean) => current,
            (_, next) => next,
        }
    }
}

/// Keys tying a session to the external dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RoutingKeys {
    /// Dialog hash entry; selects the registry bucket
    pub dialog_entry: u32,
    /// Dialog id inside the entry
    pub dialog_id: u32,
}

impl RoutingKeys {
    pub fn new(dialog_entry: u32, dialog_id: u32) -> Self {
        Self {
            dialog_entry,
            dialog_id,
        }
    }
}

/// Everything needed to open a session before the charging system answers
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub session_id: String,
    pub call_id: String,
    pub direction: Direction,
    pub identities: PartyIdentities,
    pub charging_vector: Option<ChargingVector>,
    pub rating_group: u32,
    pub service_identifier: u32,
    pub routing: RoutingKeys,
    pub origin_host: String,
    pub auth_app_id: u32,
    pub auth_session_type: u32,
}

/// The unit of billing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub session_id: String,
    pub call_id: String,
    pub direction: Direction,
    pub identities: PartyIdentities,
    pub charging_vector: Option<ChargingVector>,
    pub rating_group: u32,
    pub service_identifier: u32,
    pub routing: RoutingKeys,
    pub origin_host: String,
    pub auth_app_id: u32,
    pub auth_session_type: u32,

    /// Seconds of the current grant
    pub reserved_secs: i64,
    /// Validity of the current grant, 0 when unrestricted
    pub valid_for: i64,
    pub is_final_allocation: bool,
    pub redirect_uri: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub last_event_timestamp: DateTime<Utc>,
    pub last_event_timestamp_backup: DateTime<Utc>,
    pub billed_secs: i64,
    /// Usage reported by the interim exchange in flight
    pub pending_usage_secs: i64,
    /// CC-Request-Number of the last request sent
    pub hop_by_hop: u32,

    pub state: SessionState,
    pub active: ActiveState,
    pub ccr_sent: bool,
    #[serde(skip)]
    pub exchange_in_flight: bool,
    #[serde(skip)]
    dirty: DirtyState,
}

impl ChargingSession {
    pub fn new(params: SessionParams, now: DateTime<Utc>) -> Self {
        Self {
            session_id: params.session_id,
            call_id: params.call_id,
            direction: params.direction,
            identities: params.identities,
            charging_vector: params.charging_vector,
            rating_group: params.rating_group,
            service_identifier: params.service_identifier,
            routing: params.routing,
            origin_host: params.origin_host,
            auth_app_id: params.auth_app_id,
            auth_session_type: params.auth_session_type,
            reserved_secs: 0,
            valid_for: 0,
            is_final_allocation: false,
            redirect_uri: None,
            start_time: None,
            last_event_timestamp: now,
            last_event_timestamp_backup: now,
            billed_secs: 0,
            pending_usage_secs: 0,
            hop_by_hop: 0,
            state: SessionState::Pending,
            active: ActiveState::NotYetActive,
            ccr_sent: false,
            exchange_in_flight: false,
            dirty: DirtyState::Clean,
        }
    }

    /// Identity charged for this leg: the custom user when set, else asserted
    /// for originating and called for terminating
    pub fn subscription_identity(&self) -> &str {
        self.identities.charged_identity(self.direction)
    }

    pub fn is_active(&self) -> bool {
        self.active == ActiveState::Active
    }

    pub fn is_terminated(&self) -> bool {
        self.active == ActiveState::Terminated
    }

    /// Moves the active flag forward; returns false if the move would go backwards
    pub fn advance_active(&mut self, next: ActiveState) -> bool {
        let allowed = match (self.active, next) {
            (ActiveState::Terminated, _) => false,
            (ActiveState::Active, ActiveState::NotYetActive) => false,
            _ => true,
        };
        if allowed {
            self.active = next;
        }
        allowed
    }

    pub fn mark_dirty(&mut self, state: DirtyState) {
        self.dirty = self.dirty.merge(state);
    }

    pub fn dirty(&self) -> DirtyState {
        self.dirty
    }

    /// Hand pending persistence work to the writer
    pub fn take_dirty(&mut self) -> DirtyState {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            session_id: "scscf;1;1".to_string(),
            call_id: "call-1".to_string(),
            direction: Direction::Originating,
            identities: PartyIdentities::new("sip:alice@ims.test", "tel:+15550100"),
            charging_vector: None,
            rating_group: 100,
            service_identifier: 1000,
            routing: RoutingKeys::new(7, 42),
            origin_host: "scscf".to_string(),
            auth_app_id: 4,
            auth_session_type: 1,
        }
    }

    #[test]
    fn test_active_never_reverts_from_terminated() {
        let mut session = ChargingSession::new(params(), Utc::now());
        assert!(session.advance_active(ActiveState::Active));
        assert!(!session.advance_active(ActiveState::NotYetActive));
        assert!(session.advance_active(ActiveState::Terminated));
        assert!(!session.advance_active(ActiveState::Active));
        assert!(session.is_terminated());
    }

    #[test]
    fn test_dirty_merge() {
        assert_eq!(DirtyState::New.merge(DirtyState::Changed), DirtyState::New);
        assert_eq!(DirtyState::Changed.merge(DirtyState::Deleted), DirtyState::Deleted);
        assert_eq!(DirtyState::Deleted.merge(DirtyState::Changed), DirtyState::Deleted);
        assert_eq!(DirtyState::Clean.merge(DirtyState::Changed), DirtyState::Changed);

        let mut session = ChargingSession::new(params(), Utc::now());
        session.mark_dirty(DirtyState::Changed);
        assert_eq!(session.take_dirty(), DirtyState::Changed);
        assert_eq!(session.dirty(), DirtyState::Clean);
    }

    #[test]
    fn test_subscription_identity_follows_direction() {
        let mut session = ChargingSession::new(params(), Utc::now());
        assert_eq!(session.subscription_identity(), "sip:alice@ims.test");
        session.direction = Direction::Terminating;
        assert_eq!(session.subscription_identity(), "tel:+15550100");
    }

    #[test]
    fn test_custom_user_overrides_both_legs() {
        let mut session = ChargingSession::new(params(), Utc::now());
        session.identities.custom_user = Some("sip:billing@ims.test".to_string());
        assert_eq!(session.subscription_identity(), "sip:billing@ims.test");
        session.direction = Direction::Terminating;
        assert_eq!(session.subscription_identity(), "sip:billing@ims.test");

        session.identities.custom_user = Some(String::new());
        assert_eq!(session.subscription_identity(), "tel:+15550100");
    }

    #[test]
    fn test_state_round_trip_names() {
        for state in [
            SessionState::Pending,
            SessionState::Answered,
            SessionState::NoMoreCredit,
            SessionState::UnknownError,
        ] {
            assert_eq!(SessionState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(ActiveState::from_i32(-1), ActiveState::Terminated);
    }
}
