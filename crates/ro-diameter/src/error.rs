//! Diameter codec error types

use ro_core::ChargingError;
use thiserror::Error;

/// Codec error type
#[derive(Error, Debug)]
pub enum DiameterError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Invalid AVP: {0}")]
    InvalidAvp(String),

    #[error("Missing mandatory AVP: {0}")]
    MissingAvp(&'static str),

    #[error("Invalid AVP value for {avp}: {reason}")]
    InvalidAvpValue { avp: &'static str, reason: String },

    #[error("Buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Unexpected command code: {0}")]
    UnexpectedCommand(u32),

    #[error("Unsupported Diameter version: {0}")]
    UnsupportedVersion(u8),
}

/// Codec result type
pub type DiameterResult<T> = Result<T, DiameterError>;

impl From<DiameterError> for ChargingError {
    fn from(err: DiameterError) -> Self {
        ChargingError::Protocol(err.to_string())
    }
}

/// Result-Code values relevant to credit control (RFC 6733, RFC 4006)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultCode {
    Success = 2001,
    LimitedSuccess = 2002,
    UnableToDeliver = 3002,
    TooBusy = 3004,
    AuthenticationRejected = 4001,
    EndUserServiceDenied = 4010,
    CreditControlNotApplicable = 4011,
    CreditLimitReached = 4012,
    UnableToComply = 5012,
    UserUnknown = 5030,
    RatingFailed = 5031,
}

impl ResultCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            2001 => Some(ResultCode::Success),
            2002 => Some(ResultCode::LimitedSuccess),
            3002 => Some(ResultCode::UnableToDeliver),
            3004 => Some(ResultCode::TooBusy),
            4001 => Some(ResultCode::AuthenticationRejected),
            4010 => Some(ResultCode::EndUserServiceDenied),
            4011 => Some(ResultCode::CreditControlNotApplicable),
            4012 => Some(ResultCode::CreditLimitReached),
            5012 => Some(ResultCode::UnableToComply),
            5030 => Some(ResultCode::UserUnknown),
            5031 => Some(ResultCode::RatingFailed),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Expected business outcome rather than a fault worth an error log
    pub fn is_credit_denial(value: u32) -> bool {
        matches!(
            ResultCode::from_u32(value),
            Some(ResultCode::CreditLimitReached | ResultCode::EndUserServiceDenied)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(ResultCode::from_u32(4012), Some(ResultCode::CreditLimitReached));
        assert_eq!(ResultCode::Success.as_u32(), 2001);
        assert!(ResultCode::is_credit_denial(4012));
        assert!(!ResultCode::is_credit_denial(5012));
    }

    #[test]
    fn test_converts_to_protocol_failure() {
        let err: ChargingError = DiameterError::MissingAvp("Result-Code").into();
        assert!(err.is_denial());
    }
}
