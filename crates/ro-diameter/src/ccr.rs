//! Credit-Control-Request model
//!
//! The request is built as a plain struct and turned into a
//! `DiameterMessage` in one place, so the AVP order on the wire is stable
//! and every caller gets the same mandatory set.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::avp::{find_avp, find_vendor_avp, Avp, AvpData};
use crate::dictionary::{base, cc, ims, vendor};
use crate::error::{DiameterError, DiameterResult};
use crate::ims::{ServiceInformation, SubscriptionId};
use crate::message::DiameterMessage;
use crate::{CMD_CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID, VENDOR_ID_3GPP};

/// CC-Request-Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcRequestType {
    Initial = 1,
    Update = 2,
    Termination = 3,
    Event = 4,
}

impl CcRequestType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(CcRequestType::Initial),
            2 => Some(CcRequestType::Update),
            3 => Some(CcRequestType::Termination),
            4 => Some(CcRequestType::Event),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn accounting_record_type(self) -> AccountingRecordType {
        match self {
            CcRequestType::Initial => AccountingRecordType::Start,
            CcRequestType::Update => AccountingRecordType::Interim,
            CcRequestType::Termination => AccountingRecordType::Stop,
            CcRequestType::Event => AccountingRecordType::Event,
        }
    }

    /// SIP method reported in Event-Type for this request
    pub fn sip_method(self) -> &'static str {
        match self {
            CcRequestType::Initial | CcRequestType::Event => "INVITE",
            CcRequestType::Update => "UPDATE",
            CcRequestType::Termination => "BYE",
        }
    }
}

/// Accounting-Record-Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingRecordType {
    Event = 1,
    Start = 2,
    Interim = 3,
    Stop = 4,
}

/// Multiple-Services-Credit-Control group of a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsccRequest {
    /// Requested-Service-Unit / CC-Time
    pub requested_secs: Option<u32>,
    /// Used-Service-Unit / CC-Time
    pub used_secs: Option<u32>,
    pub rating_group: Option<u32>,
    pub service_identifier: Option<u32>,
}

impl MsccRequest {
    pub fn to_avp(&self) -> Avp {
        let mut children = Vec::new();
        if let Some(secs) = self.requested_secs {
            children.push(Avp::grouped(
                cc::REQUESTED_SERVICE_UNIT,
                vec![Avp::u32(cc::CC_TIME, secs)],
            ));
        }
        if let Some(secs) = self.used_secs {
            children.push(Avp::grouped(
                cc::USED_SERVICE_UNIT,
                vec![Avp::u32(cc::CC_TIME, secs)],
            ));
        }
        if let Some(id) = self.service_identifier {
            children.push(Avp::u32(cc::SERVICE_IDENTIFIER, id));
        }
        if let Some(group) = self.rating_group {
            children.push(Avp::u32(cc::RATING_GROUP, group));
        }
        Avp::grouped(cc::MULTIPLE_SERVICES_CREDIT_CONTROL, children)
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        let children = avp.children()?;
        let cc_time = |code: u32| -> DiameterResult<Option<u32>> {
            match find_avp(&children, code) {
                Some(unit) => Ok(find_avp(&unit.children()?, cc::CC_TIME).and_then(Avp::as_u32)),
                None => Ok(None),
            }
        };
        Ok(Self {
            requested_secs: cc_time(cc::REQUESTED_SERVICE_UNIT)?,
            used_secs: cc_time(cc::USED_SERVICE_UNIT)?,
            rating_group: find_avp(&children, cc::RATING_GROUP).and_then(Avp::as_u32),
            service_identifier: find_avp(&children, cc::SERVICE_IDENTIFIER).and_then(Avp::as_u32),
        })
    }
}

/// Vendor-specific termination details appended to STOP requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorTermination {
    pub vendor_id: u32,
    pub code: u32,
    pub reason: String,
}

/// Credit-Control-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditControlRequest {
    pub session_id: String,
    pub origin_host: String,
    pub origin_realm: String,
    pub destination_realm: String,
    pub destination_host: Option<String>,
    pub service_context_id: String,
    pub request_type: CcRequestType,
    pub request_number: u32,
    pub user_name: Option<String>,
    pub event_timestamp: Option<DateTime<Utc>>,
    /// User-Equipment-Info MAC value
    pub user_equipment_mac: Option<String>,
    pub subscription_id: Option<SubscriptionId>,
    pub mscc: Option<MsccRequest>,
    pub service_information: Option<ServiceInformation>,
    /// Termination-Cause, only on TERMINATION requests
    pub termination_cause: Option<i32>,
    pub vendor_termination: Option<VendorTermination>,
}

impl CreditControlRequest {
    pub fn new(
        session_id: impl Into<String>,
        request_type: CcRequestType,
        request_number: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            origin_host: String::new(),
            origin_realm: String::new(),
            destination_realm: String::new(),
            destination_host: None,
            service_context_id: String::new(),
            request_type,
            request_number,
            user_name: None,
            event_timestamp: None,
            user_equipment_mac: None,
            subscription_id: None,
            mscc: None,
            service_information: None,
            termination_cause: None,
            vendor_termination: None,
        }
    }

    pub fn to_message(&self) -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(CMD_CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID);
        msg.header.hop_by_hop_id = self.request_number;

        msg.add_avp(Avp::utf8(base::SESSION_ID, self.session_id.clone()));
        msg.add_avp(Avp::identity(base::ORIGIN_HOST, self.origin_host.clone()));
        msg.add_avp(Avp::identity(base::ORIGIN_REALM, self.origin_realm.clone()));
        msg.add_avp(Avp::identity(base::DESTINATION_REALM, self.destination_realm.clone()));
        if let Some(host) = &self.destination_host {
            msg.add_avp(Avp::identity(base::DESTINATION_HOST, host.clone()));
        }
        msg.add_avp(Avp::u32(base::AUTH_APPLICATION_ID, CREDIT_CONTROL_APPLICATION_ID));
        msg.add_avp(Avp::enumerated(
            base::ACCOUNTING_RECORD_TYPE,
            self.request_type.accounting_record_type() as i32,
        ));
        msg.add_avp(Avp::u32(base::ACCOUNTING_RECORD_NUMBER, self.request_number));
        if let Some(user) = &self.user_name {
            msg.add_avp(Avp::utf8(base::USER_NAME, user.clone()));
        }
        msg.add_avp(Avp::utf8(cc::SERVICE_CONTEXT_ID, self.service_context_id.clone()));
        msg.add_avp(Avp::grouped(
            base::VENDOR_SPECIFIC_APPLICATION_ID,
            vec![
                Avp::u32(base::VENDOR_ID, VENDOR_ID_3GPP),
                Avp::u32(base::AUTH_APPLICATION_ID, CREDIT_CONTROL_APPLICATION_ID),
            ],
        ));
        msg.add_avp(Avp::enumerated(cc::CC_REQUEST_TYPE, self.request_type as i32));
        msg.add_avp(Avp::u32(cc::CC_REQUEST_NUMBER, self.request_number));
        if let Some(at) = self.event_timestamp {
            msg.add_avp(Avp::time(base::EVENT_TIMESTAMP, at));
        }
        if let Some(mac) = &self.user_equipment_mac {
            msg.add_avp(Avp::grouped(
                cc::USER_EQUIPMENT_INFO,
                vec![
                    Avp::enumerated(cc::USER_EQUIPMENT_INFO_TYPE, cc::USER_EQUIPMENT_INFO_TYPE_MAC),
                    Avp::octets(cc::USER_EQUIPMENT_INFO_VALUE, Bytes::from(mac.clone().into_bytes())),
                ],
            ));
        }
        if let Some(subscription) = &self.subscription_id {
            msg.add_avp(subscription.to_avp());
        }
        msg.add_avp(Avp::enumerated(
            cc::MULTIPLE_SERVICES_INDICATOR,
            cc::MULTIPLE_SERVICES_SUPPORTED,
        ));
        if let Some(mscc) = &self.mscc {
            msg.add_avp(mscc.to_avp());
        }
        if let Some(info) = &self.service_information {
            msg.add_avp(info.to_avp());
        }
        if let Some(cause) = self.termination_cause {
            msg.add_avp(Avp::enumerated(base::TERMINATION_CAUSE, cause));
        }
        if let Some(term) = &self.vendor_termination {
            msg.add_avp(Avp::vendor_optional(
                vendor::TERMINATION_CODE,
                term.vendor_id,
                AvpData::Unsigned32(term.code),
            ));
            msg.add_avp(Avp::vendor_optional(
                vendor::TERMINATION_REASON,
                term.vendor_id,
                AvpData::Utf8String(term.reason.clone()),
            ));
        }

        msg
    }

    /// Read a request back, used by charging-system implementations
    pub fn from_message(msg: &DiameterMessage) -> DiameterResult<Self> {
        if msg.header.command_code != CMD_CREDIT_CONTROL {
            return Err(DiameterError::UnexpectedCommand(msg.header.command_code));
        }
        if !msg.header.is_request() {
            return Err(DiameterError::InvalidMessage(
                "expected a Credit-Control-Request".to_string(),
            ));
        }

        let text = |code: u32| msg.find_avp(code).and_then(Avp::as_utf8_string).map(str::to_string);

        let session_id = msg
            .session_id()
            .ok_or(DiameterError::MissingAvp("Session-Id"))?;
        let raw_type = msg
            .find_avp(cc::CC_REQUEST_TYPE)
            .and_then(Avp::as_u32)
            .ok_or(DiameterError::MissingAvp("CC-Request-Type"))?;
        let request_type = CcRequestType::from_u32(raw_type).ok_or_else(|| {
            DiameterError::InvalidAvpValue {
                avp: "CC-Request-Type",
                reason: raw_type.to_string(),
            }
        })?;
        let request_number = msg
            .find_avp(cc::CC_REQUEST_NUMBER)
            .and_then(Avp::as_u32)
            .ok_or(DiameterError::MissingAvp("CC-Request-Number"))?;

        let mut request = Self::new(session_id, request_type, request_number);
        request.origin_host = text(base::ORIGIN_HOST).unwrap_or_default();
        request.origin_realm = text(base::ORIGIN_REALM).unwrap_or_default();
        request.destination_realm = text(base::DESTINATION_REALM).unwrap_or_default();
        request.destination_host = text(base::DESTINATION_HOST);
        request.service_context_id = text(cc::SERVICE_CONTEXT_ID).unwrap_or_default();
        request.user_name = text(base::USER_NAME);
        request.event_timestamp = msg.find_avp(base::EVENT_TIMESTAMP).and_then(Avp::as_time);

        if let Some(equipment) = msg.find_avp(cc::USER_EQUIPMENT_INFO) {
            let children = equipment.children()?;
            request.user_equipment_mac = find_avp(&children, cc::USER_EQUIPMENT_INFO_VALUE)
                .and_then(Avp::as_utf8_string)
                .map(str::to_string);
        }

        request.subscription_id = msg
            .find_avp(cc::SUBSCRIPTION_ID)
            .map(SubscriptionId::from_avp)
            .transpose()?;
        request.mscc = msg
            .find_avp(cc::MULTIPLE_SERVICES_CREDIT_CONTROL)
            .map(MsccRequest::from_avp)
            .transpose()?;
        request.service_information = msg
            .find_vendor_avp(ims::SERVICE_INFORMATION, VENDOR_ID_3GPP)
            .map(ServiceInformation::from_avp)
            .transpose()?;
        request.termination_cause = msg.find_avp(base::TERMINATION_CAUSE).and_then(Avp::as_i32);

        let vendor_code = msg
            .avps
            .iter()
            .find(|a| a.code == vendor::TERMINATION_CODE && a.vendor_id.is_some());
        if let Some(code_avp) = vendor_code {
            let vendor_id = code_avp.vendor_id.unwrap_or_default();
            request.vendor_termination = Some(VendorTermination {
                vendor_id,
                code: code_avp.as_u32().unwrap_or_default(),
                reason: find_vendor_avp(&msg.avps, vendor::TERMINATION_REASON, vendor_id)
                    .and_then(Avp::as_utf8_string)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(request)
    }
}
