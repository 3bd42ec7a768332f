//! Unified error handling for the charging engine
//!
//! Errors are grouped by how the engine reacts to them: allocation failures
//! abort the operation, protocol and transport failures are treated as a
//! denied reservation, and inconsistent-state errors are logged and turned
//! into no-ops by the caller.

use thiserror::Error;

/// Main charging error type
#[derive(Error, Debug)]
pub enum ChargingError {
    // ==================== Allocation Errors ====================
    #[error("Session allocation failed: {0}")]
    AllocationFailure(String),

    // ==================== Protocol Errors ====================
    #[error("Protocol failure: {0}")]
    Protocol(String),

    #[error("Reservation denied by charging system: result code {result_code}")]
    ReservationDenied { result_code: u32 },

    #[error("Granted units are not positive: {0}")]
    NonPositiveGrant(i64),

    // ==================== Transport Errors ====================
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Timeout: no answer within {0}ms")]
    Timeout(u64),

    // ==================== State Errors ====================
    #[error("Inconsistent session state: {0}")]
    InconsistentState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Timer error: {0}")]
    Timer(String),

    // ==================== Persistence Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    // ==================== Internal Errors ====================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChargingError {
    /// Returns a stable error code for logs and diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            ChargingError::AllocationFailure(_) => "allocation_failure",
            ChargingError::Protocol(_) => "protocol_failure",
            ChargingError::ReservationDenied { .. } => "reservation_denied",
            ChargingError::NonPositiveGrant(_) => "non_positive_grant",
            ChargingError::Transport(_) => "transport_failure",
            ChargingError::Timeout(_) => "timeout",
            ChargingError::InconsistentState(_) => "inconsistent_state",
            ChargingError::SessionNotFound(_) => "session_not_found",
            ChargingError::Timer(_) => "timer_error",
            ChargingError::Database(_) => "database_error",
            ChargingError::Pool(_) => "pool_error",
            ChargingError::Config(_) => "config_error",
            ChargingError::Serialization(_) => "serialization_error",
            ChargingError::Internal(_) => "internal_error",
        }
    }

    /// Protocol failures are handled as a denied reservation
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            ChargingError::Protocol(_)
                | ChargingError::ReservationDenied { .. }
                | ChargingError::NonPositiveGrant(_)
        )
    }

    /// No answer was received from the charging system
    pub fn is_transport(&self) -> bool {
        matches!(self, ChargingError::Transport(_) | ChargingError::Timeout(_))
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for ChargingError {
    fn from(err: serde_json::Error) -> Self {
        ChargingError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ChargingError {
    fn from(err: std::io::Error) -> Self {
        ChargingError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for ChargingError {
    fn from(err: config::ConfigError) -> Self {
        ChargingError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ChargingError::ReservationDenied { result_code: 4012 }.error_code(),
            "reservation_denied"
        );
        assert_eq!(ChargingError::Timeout(5000).error_code(), "timeout");
        assert_eq!(
            ChargingError::InconsistentState("double confirm".to_string()).error_code(),
            "inconsistent_state"
        );
    }

    #[test]
    fn test_taxonomy() {
        assert!(ChargingError::NonPositiveGrant(0).is_denial());
        assert!(ChargingError::Protocol("missing MSCC".to_string()).is_denial());
        assert!(!ChargingError::Timeout(10).is_denial());
        assert!(ChargingError::Timeout(10).is_transport());
        assert!(!ChargingError::AllocationFailure("full".to_string()).is_transport());
    }
}
