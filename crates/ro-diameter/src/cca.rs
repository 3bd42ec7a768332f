//! Credit-Control-Answer model and grant extraction

use ro_core::models::{CreditGrant, FinalUnitAction, RedirectTarget};
use ro_core::ChargingError;
use thiserror::Error;
use tracing::warn;

use crate::avp::{find_avp, Avp};
use crate::ccr::CcRequestType;
use crate::dictionary::{base, cc};
use crate::error::{DiameterError, DiameterResult, ResultCode};
use crate::message::DiameterMessage;
use crate::CMD_CREDIT_CONTROL;

/// Redirect-Server group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectServer {
    pub address_type: i32,
    pub address: String,
}

/// Final-Unit-Indication group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalUnitIndication {
    pub action: FinalUnitAction,
    pub redirect_server: Option<RedirectServer>,
}

impl FinalUnitIndication {
    pub fn terminate() -> Self {
        Self {
            action: FinalUnitAction::Terminate,
            redirect_server: None,
        }
    }

    fn to_avp(&self) -> Avp {
        let mut children = vec![Avp::enumerated(cc::FINAL_UNIT_ACTION, self.action.as_u32() as i32)];
        if let Some(server) = &self.redirect_server {
            children.push(Avp::grouped(
                cc::REDIRECT_SERVER,
                vec![
                    Avp::enumerated(cc::REDIRECT_ADDRESS_TYPE, server.address_type),
                    Avp::utf8(cc::REDIRECT_SERVER_ADDRESS, server.address.clone()),
                ],
            ));
        }
        Avp::grouped(cc::FINAL_UNIT_INDICATION, children)
    }

    fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        let children = avp.children()?;
        let raw = find_avp(&children, cc::FINAL_UNIT_ACTION)
            .and_then(Avp::as_u32)
            .ok_or(DiameterError::MissingAvp("Final-Unit-Action"))?;
        let action = FinalUnitAction::from_u32(raw).ok_or_else(|| DiameterError::InvalidAvpValue {
            avp: "Final-Unit-Action",
            reason: raw.to_string(),
        })?;

        let redirect_server = match find_avp(&children, cc::REDIRECT_SERVER) {
            Some(server) => {
                let server = server.children()?;
                Some(RedirectServer {
                    address_type: find_avp(&server, cc::REDIRECT_ADDRESS_TYPE)
                        .and_then(Avp::as_i32)
                        .ok_or(DiameterError::MissingAvp("Redirect-Address-Type"))?,
                    address: find_avp(&server, cc::REDIRECT_SERVER_ADDRESS)
                        .and_then(Avp::as_utf8_string)
                        .ok_or(DiameterError::MissingAvp("Redirect-Server-Address"))?
                        .to_string(),
                })
            }
            None => None,
        };

        Ok(Self {
            action,
            redirect_server,
        })
    }
}

/// Multiple-Services-Credit-Control group of an answer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsccAnswer {
    pub result_code: Option<u32>,
    /// Granted-Service-Unit / CC-Time
    pub granted_secs: Option<u32>,
    pub validity_time: Option<u32>,
    pub rating_group: Option<u32>,
    pub service_identifier: Option<u32>,
    pub final_unit_indication: Option<FinalUnitIndication>,
}

impl MsccAnswer {
    fn to_avp(&self) -> Avp {
        let mut children = Vec::new();
        if let Some(secs) = self.granted_secs {
            children.push(Avp::grouped(
                cc::GRANTED_SERVICE_UNIT,
                vec![Avp::u32(cc::CC_TIME, secs)],
            ));
        }
        if let Some(id) = self.service_identifier {
            children.push(Avp::u32(cc::SERVICE_IDENTIFIER, id));
        }
        if let Some(group) = self.rating_group {
            children.push(Avp::u32(cc::RATING_GROUP, group));
        }
        if let Some(validity) = self.validity_time {
            children.push(Avp::u32(cc::VALIDITY_TIME, validity));
        }
        if let Some(code) = self.result_code {
            children.push(Avp::u32(base::RESULT_CODE, code));
        }
        if let Some(fui) = &self.final_unit_indication {
            children.push(fui.to_avp());
        }
        Avp::grouped(cc::MULTIPLE_SERVICES_CREDIT_CONTROL, children)
    }

    fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        let children = avp.children()?;
        let granted_secs = match find_avp(&children, cc::GRANTED_SERVICE_UNIT) {
            Some(unit) => find_avp(&unit.children()?, cc::CC_TIME).and_then(Avp::as_u32),
            None => None,
        };
        Ok(Self {
            result_code: find_avp(&children, base::RESULT_CODE).and_then(Avp::as_u32),
            granted_secs,
            validity_time: find_avp(&children, cc::VALIDITY_TIME).and_then(Avp::as_u32),
            rating_group: find_avp(&children, cc::RATING_GROUP).and_then(Avp::as_u32),
            service_identifier: find_avp(&children, cc::SERVICE_IDENTIFIER).and_then(Avp::as_u32),
            final_unit_indication: find_avp(&children, cc::FINAL_UNIT_INDICATION)
                .map(FinalUnitIndication::from_avp)
                .transpose()?,
        })
    }
}

/// Why an answer does not amount to a usable grant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrantRejection {
    #[error("answer carries Result-Code {0}")]
    ResultCode(u32),

    #[error("MSCC carries Result-Code {0}")]
    MsccResultCode(u32),

    #[error("answer has no Multiple-Services-Credit-Control")]
    MissingMscc,

    #[error("granted CC-Time {0} is not positive")]
    NonPositiveGrant(i64),
}

impl GrantRejection {
    /// Result code reported to the caller of a denied reservation
    pub fn result_code(&self) -> u32 {
        match self {
            GrantRejection::ResultCode(code) | GrantRejection::MsccResultCode(code) => *code,
            GrantRejection::MissingMscc | GrantRejection::NonPositiveGrant(_) => {
                ResultCode::UnableToComply.as_u32()
            }
        }
    }
}

impl From<GrantRejection> for ChargingError {
    fn from(rejection: GrantRejection) -> Self {
        match rejection {
            GrantRejection::ResultCode(code) | GrantRejection::MsccResultCode(code) => {
                ChargingError::ReservationDenied { result_code: code }
            }
            GrantRejection::NonPositiveGrant(secs) => ChargingError::NonPositiveGrant(secs),
            GrantRejection::MissingMscc => ChargingError::Protocol(rejection.to_string()),
        }
    }
}

/// Credit-Control-Answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditControlAnswer {
    pub session_id: String,
    pub origin_host: Option<String>,
    pub origin_realm: Option<String>,
    pub result_code: u32,
    pub request_type: Option<CcRequestType>,
    pub request_number: Option<u32>,
    pub mscc: Option<MsccAnswer>,
}

impl CreditControlAnswer {
    pub fn new(session_id: impl Into<String>, result_code: u32) -> Self {
        Self {
            session_id: session_id.into(),
            origin_host: None,
            origin_realm: None,
            result_code,
            request_type: None,
            request_number: None,
            mscc: None,
        }
    }

    pub fn from_message(msg: &DiameterMessage) -> DiameterResult<Self> {
        if msg.header.command_code != CMD_CREDIT_CONTROL {
            return Err(DiameterError::UnexpectedCommand(msg.header.command_code));
        }
        if msg.header.is_request() {
            return Err(DiameterError::InvalidMessage(
                "expected a Credit-Control-Answer".to_string(),
            ));
        }

        let session_id = msg
            .session_id()
            .ok_or(DiameterError::MissingAvp("Session-Id"))?;
        let result_code = msg
            .result_code()
            .ok_or(DiameterError::MissingAvp("Result-Code"))?;
        let text = |code: u32| msg.find_avp(code).and_then(Avp::as_utf8_string).map(str::to_string);

        Ok(Self {
            session_id: session_id.to_string(),
            origin_host: text(base::ORIGIN_HOST),
            origin_realm: text(base::ORIGIN_REALM),
            result_code,
            request_type: msg
                .find_avp(cc::CC_REQUEST_TYPE)
                .and_then(Avp::as_u32)
                .and_then(CcRequestType::from_u32),
            request_number: msg.find_avp(cc::CC_REQUEST_NUMBER).and_then(Avp::as_u32),
            mscc: msg
                .find_avp(cc::MULTIPLE_SERVICES_CREDIT_CONTROL)
                .map(MsccAnswer::from_avp)
                .transpose()?,
        })
    }

    /// Build the answer message for `request`, mirroring its identifiers
    pub fn to_message(&self, request: &DiameterMessage) -> DiameterMessage {
        let mut msg = DiameterMessage::new_answer(request);
        msg.add_avp(Avp::utf8(base::SESSION_ID, self.session_id.clone()));
        msg.add_avp(Avp::u32(base::RESULT_CODE, self.result_code));
        if let Some(host) = &self.origin_host {
            msg.add_avp(Avp::identity(base::ORIGIN_HOST, host.clone()));
        }
        if let Some(realm) = &self.origin_realm {
            msg.add_avp(Avp::identity(base::ORIGIN_REALM, realm.clone()));
        }
        if let Some(kind) = self.request_type {
            msg.add_avp(Avp::enumerated(cc::CC_REQUEST_TYPE, kind as i32));
        }
        if let Some(number) = self.request_number {
            msg.add_avp(Avp::u32(cc::CC_REQUEST_NUMBER, number));
        }
        if let Some(mscc) = &self.mscc {
            msg.add_avp(mscc.to_avp());
        }
        msg
    }

    /// Credit granted by this answer
    ///
    /// Any non-success result code, top level or MSCC level, a missing MSCC
    /// or a granted time of zero rejects the answer. A redirect that does
    /// not point at a SIP URI is dropped from the grant.
    pub fn grant(&self) -> Result<CreditGrant, GrantRejection> {
        if self.result_code != ResultCode::Success.as_u32() {
            return Err(GrantRejection::ResultCode(self.result_code));
        }
        let mscc = self.mscc.as_ref().ok_or(GrantRejection::MissingMscc)?;
        if let Some(code) = mscc.result_code {
            if code != ResultCode::Success.as_u32() {
                return Err(GrantRejection::MsccResultCode(code));
            }
        }

        let granted_secs = i64::from(mscc.granted_secs.unwrap_or(0));
        if granted_secs <= 0 {
            return Err(GrantRejection::NonPositiveGrant(granted_secs));
        }

        let final_unit_action = mscc.final_unit_indication.as_ref().map(|fui| fui.action);
        let redirect = mscc.final_unit_indication.as_ref().and_then(|fui| {
            if fui.action != FinalUnitAction::Redirect {
                return None;
            }
            match &fui.redirect_server {
                Some(server) if server.address_type == cc::REDIRECT_ADDRESS_SIP_URI => {
                    Some(RedirectTarget {
                        uri: server.address.clone(),
                    })
                }
                Some(server) => {
                    warn!(
                        session_id = %self.session_id,
                        address_type = server.address_type,
                        "Ignoring redirect with unsupported address type"
                    );
                    None
                }
                None => {
                    warn!(session_id = %self.session_id, "Redirect action without Redirect-Server");
                    None
                }
            }
        });

        Ok(CreditGrant {
            granted_secs,
            validity_secs: i64::from(mscc.validity_time.unwrap_or(0)),
            final_unit_action,
            redirect,
            result_code: self.result_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccr::CreditControlRequest;

    fn answer_with(mscc: MsccAnswer) -> CreditControlAnswer {
        let mut answer = CreditControlAnswer::new("scscf;1;1", 2001);
        answer.request_type = Some(CcRequestType::Initial);
        answer.request_number = Some(0);
        answer.mscc = Some(mscc);
        answer
    }

    fn through_wire(answer: &CreditControlAnswer) -> CreditControlAnswer {
        let request = CreditControlRequest::new("scscf;1;1", CcRequestType::Initial, 0).to_message();
        let mut bytes = answer.to_message(&request).encode().freeze();
        let msg = DiameterMessage::decode(&mut bytes).unwrap();
        CreditControlAnswer::from_message(&msg).unwrap()
    }

    #[test]
    fn test_grant_from_successful_answer() {
        let answer = through_wire(&answer_with(MsccAnswer {
            result_code: Some(2001),
            granted_secs: Some(30),
            validity_time: Some(60),
            ..Default::default()
        }));
        let grant = answer.grant().unwrap();
        assert_eq!(grant.granted_secs, 30);
        assert_eq!(grant.validity_secs, 60);
        assert!(!grant.is_final_allocation());
        assert_eq!(answer.request_number, Some(0));
    }

    #[test]
    fn test_final_unit_terminate() {
        let answer = through_wire(&answer_with(MsccAnswer {
            granted_secs: Some(10),
            final_unit_indication: Some(FinalUnitIndication::terminate()),
            ..Default::default()
        }));
        assert!(answer.grant().unwrap().is_final_allocation());
    }

    #[test]
    fn test_redirect_requires_sip_uri() {
        let mut fui = FinalUnitIndication {
            action: FinalUnitAction::Redirect,
            redirect_server: Some(RedirectServer {
                address_type: cc::REDIRECT_ADDRESS_SIP_URI,
                address: "sip:topup@ims.test".to_string(),
            }),
        };
        let answer = through_wire(&answer_with(MsccAnswer {
            granted_secs: Some(10),
            final_unit_indication: Some(fui.clone()),
            ..Default::default()
        }));
        assert_eq!(
            answer.grant().unwrap().redirect.map(|r| r.uri),
            Some("sip:topup@ims.test".to_string())
        );

        fui.redirect_server = Some(RedirectServer {
            address_type: cc::REDIRECT_ADDRESS_URL,
            address: "http://topup.test".to_string(),
        });
        let answer = answer_with(MsccAnswer {
            granted_secs: Some(10),
            final_unit_indication: Some(fui),
            ..Default::default()
        });
        let grant = answer.grant().unwrap();
        assert!(grant.redirect.is_none());
        assert_eq!(grant.final_unit_action, Some(FinalUnitAction::Redirect));
    }

    #[test]
    fn test_rejections() {
        let denied = CreditControlAnswer::new("s", 4012);
        assert_eq!(denied.grant(), Err(GrantRejection::ResultCode(4012)));
        assert_eq!(GrantRejection::ResultCode(4012).result_code(), 4012);

        let missing = CreditControlAnswer::new("s", 2001);
        assert_eq!(missing.grant(), Err(GrantRejection::MissingMscc));

        let zero = answer_with(MsccAnswer {
            granted_secs: Some(0),
            ..Default::default()
        });
        assert_eq!(zero.grant(), Err(GrantRejection::NonPositiveGrant(0)));

        let mscc_denied = answer_with(MsccAnswer {
            result_code: Some(4012),
            granted_secs: Some(30),
            ..Default::default()
        });
        assert_eq!(mscc_denied.grant(), Err(GrantRejection::MsccResultCode(4012)));

        let err: ChargingError = GrantRejection::NonPositiveGrant(0).into();
        assert!(err.is_denial());
    }

    #[test]
    fn test_request_is_not_an_answer() {
        let request = CreditControlRequest::new("s", CcRequestType::Update, 1).to_message();
        assert!(CreditControlAnswer::from_message(&request).is_err());
    }
}
