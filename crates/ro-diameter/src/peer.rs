//! Transport seam towards the Online Charging System

use async_trait::async_trait;
use ro_core::ChargingError;
use thiserror::Error;

use crate::message::DiameterMessage;

/// Why an exchange produced no answer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("no answer within {0} ms")]
    Timeout(u64),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("exchange cancelled")]
    Cancelled,
}

impl From<PeerError> for ChargingError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Timeout(ms) => ChargingError::Timeout(ms),
            PeerError::Transport(msg) => ChargingError::Transport(msg),
            PeerError::Cancelled => ChargingError::Transport(err.to_string()),
        }
    }
}

/// Delivers a Credit-Control-Request and waits for its answer
///
/// `destination` names a forced peer; `None` lets the implementation route
/// by Destination-Realm.
#[async_trait]
pub trait CreditControlPeer: Send + Sync + 'static {
    async fn send(
        &self,
        request: DiameterMessage,
        destination: Option<&str>,
    ) -> Result<DiameterMessage, PeerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccr::{CcRequestType, CreditControlRequest};
    use crate::cca::CreditControlAnswer;

    struct EchoPeer;

    #[async_trait]
    impl CreditControlPeer for EchoPeer {
        async fn send(
            &self,
            request: DiameterMessage,
            destination: Option<&str>,
        ) -> Result<DiameterMessage, PeerError> {
            if destination == Some("down.test") {
                return Err(PeerError::Transport("connection refused".to_string()));
            }
            let session_id = request.session_id().unwrap_or_default().to_string();
            Ok(CreditControlAnswer::new(session_id, 2001).to_message(&request))
        }
    }

    #[tokio::test]
    async fn test_peer_answers_and_fails() {
        let peer = EchoPeer;
        let request = CreditControlRequest::new("s;1;1", CcRequestType::Event, 0).to_message();

        let answer = peer.send(request.clone(), None).await.unwrap();
        assert_eq!(answer.result_code(), Some(2001));

        let err = peer.send(request, Some("down.test")).await.unwrap_err();
        let err: ChargingError = err.into();
        assert!(err.is_transport());
    }
}
