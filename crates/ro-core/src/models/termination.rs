//! Why a charging session was finalized

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason carried by the STOP record and by call termination requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TerminationCause {
    /// The signaling layer ended the call (hangup, failure, dialog expiry)
    CallEnded { code: u32, reason: String },
    /// Final granted units were consumed or the charging system denied more
    CreditExhausted,
    /// The charging system stopped answering mid-call
    ChargingFailure,
    /// Operator requested stop
    Administrative { code: u32, reason: String },
}

impl TerminationCause {
    pub fn normal_clearing() -> Self {
        TerminationCause::CallEnded {
            code: 200,
            reason: "Normal call clearing".to_string(),
        }
    }

    /// Numeric code reported to the call layer and in vendor-specific AVPs
    pub fn code(&self) -> u32 {
        match self {
            TerminationCause::CallEnded { code, .. } => *code,
            TerminationCause::CreditExhausted => 402,
            TerminationCause::ChargingFailure => 503,
            TerminationCause::Administrative { code, .. } => *code,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            TerminationCause::CallEnded { reason, .. } => reason,
            TerminationCause::CreditExhausted => "Credit exhausted",
            TerminationCause::ChargingFailure => "Charging system unavailable",
            TerminationCause::Administrative { reason, .. } => reason,
        }
    }

    /// IMS Cause-Code: 0 for a normal end of session, 2 otherwise
    pub fn ims_cause_code(&self) -> i32 {
        match self {
            TerminationCause::CallEnded { .. } => 0,
            _ => 2,
        }
    }

    /// The engine, not the call layer, decided to end the call
    pub fn is_engine_initiated(&self) -> bool {
        matches!(
            self,
            TerminationCause::CreditExhausted | TerminationCause::ChargingFailure
        )
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}
