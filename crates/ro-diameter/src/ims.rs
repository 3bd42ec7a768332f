//! Service-Information groups (3GPP TS 32.299)
//!
//! Each group converts to a grouped AVP and back. Decoders are lenient about
//! optional members and strict about the members the group cannot exist
//! without.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ro_core::models::Direction;

use crate::avp::{find_all_avps, find_avp, Avp, AvpData};
use crate::dictionary::{cc, ims};
use crate::error::{DiameterError, DiameterResult};
use crate::VENDOR_ID_3GPP;

fn v3(code: u32, data: AvpData) -> Avp {
    Avp::vendor_mandatory(code, VENDOR_ID_3GPP, data)
}

fn v3_text(code: u32, value: &str) -> Avp {
    v3(code, AvpData::Utf8String(value.to_string()))
}

fn text(avps: &[Avp], code: u32) -> Option<String> {
    find_avp(avps, code)
        .and_then(Avp::as_utf8_string)
        .map(str::to_string)
}

fn expect_code(avp: &Avp, code: u32, name: &'static str) -> DiameterResult<()> {
    if avp.code == code {
        Ok(())
    } else {
        Err(DiameterError::InvalidAvpValue {
            avp: name,
            reason: format!("unexpected AVP code {}", avp.code),
        })
    }
}

/// Subscription-Id-Type values (RFC 4006)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionIdType {
    EndUserE164 = 0,
    EndUserImsi = 1,
    EndUserSipUri = 2,
    EndUserNai = 3,
    EndUserPrivate = 4,
}

impl SubscriptionIdType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(SubscriptionIdType::EndUserE164),
            1 => Some(SubscriptionIdType::EndUserImsi),
            2 => Some(SubscriptionIdType::EndUserSipUri),
            3 => Some(SubscriptionIdType::EndUserNai),
            4 => Some(SubscriptionIdType::EndUserPrivate),
            _ => None,
        }
    }
}

/// Subscription-Id group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId {
    pub kind: SubscriptionIdType,
    pub data: String,
}

impl SubscriptionId {
    /// `tel:` identities are E.164 numbers without the scheme, anything else is a SIP URI
    pub fn from_identity(identity: &str) -> Self {
        let is_tel = identity
            .get(..4)
            .map(|scheme| scheme.eq_ignore_ascii_case("tel:"))
            .unwrap_or(false);
        if is_tel {
            Self {
                kind: SubscriptionIdType::EndUserE164,
                data: identity[4..].to_string(),
            }
        } else {
            Self {
                kind: SubscriptionIdType::EndUserSipUri,
                data: identity.to_string(),
            }
        }
    }

    pub fn to_avp(&self) -> Avp {
        Avp::grouped(
            cc::SUBSCRIPTION_ID,
            vec![
                Avp::enumerated(cc::SUBSCRIPTION_ID_TYPE, self.kind as i32),
                Avp::utf8(cc::SUBSCRIPTION_ID_DATA, self.data.clone()),
            ],
        )
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        expect_code(avp, cc::SUBSCRIPTION_ID, "Subscription-Id")?;
        let children = avp.children()?;
        let kind = find_avp(&children, cc::SUBSCRIPTION_ID_TYPE)
            .and_then(Avp::as_i32)
            .ok_or(DiameterError::MissingAvp("Subscription-Id-Type"))?;
        let kind = SubscriptionIdType::from_i32(kind).ok_or_else(|| DiameterError::InvalidAvpValue {
            avp: "Subscription-Id-Type",
            reason: kind.to_string(),
        })?;
        let data = text(&children, cc::SUBSCRIPTION_ID_DATA)
            .ok_or(DiameterError::MissingAvp("Subscription-Id-Data"))?;
        Ok(Self { kind, data })
    }
}

/// Event-Type group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventType {
    pub sip_method: Option<String>,
    pub event: Option<String>,
    pub expires: Option<u32>,
}

impl EventType {
    pub fn sip_method(method: &str) -> Self {
        Self {
            sip_method: Some(method.to_string()),
            ..Default::default()
        }
    }

    pub fn to_avp(&self) -> Avp {
        let mut children = Vec::new();
        if let Some(method) = &self.sip_method {
            children.push(v3_text(ims::SIP_METHOD, method));
        }
        if let Some(event) = &self.event {
            children.push(v3_text(ims::EVENT, event));
        }
        if let Some(expires) = self.expires {
            children.push(v3(ims::EXPIRES, AvpData::Unsigned32(expires)));
        }
        v3(ims::EVENT_TYPE, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        expect_code(avp, ims::EVENT_TYPE, "Event-Type")?;
        let children = avp.children()?;
        Ok(Self {
            sip_method: text(&children, ims::SIP_METHOD),
            event: text(&children, ims::EVENT),
            expires: find_avp(&children, ims::EXPIRES).and_then(Avp::as_u32),
        })
    }
}

/// Time-Stamps group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeStamps {
    pub sip_request: Option<DateTime<Utc>>,
    pub sip_response: Option<DateTime<Utc>>,
}

impl TimeStamps {
    pub fn to_avp(&self) -> Avp {
        let mut children = Vec::new();
        if let Some(at) = self.sip_request {
            children.push(v3(ims::SIP_REQUEST_TIMESTAMP, AvpData::Time(crate::avp::ntp_seconds(at))));
        }
        if let Some(at) = self.sip_response {
            children.push(v3(ims::SIP_RESPONSE_TIMESTAMP, AvpData::Time(crate::avp::ntp_seconds(at))));
        }
        v3(ims::TIME_STAMPS, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        expect_code(avp, ims::TIME_STAMPS, "Time-Stamps")?;
        let children = avp.children()?;
        Ok(Self {
            sip_request: find_avp(&children, ims::SIP_REQUEST_TIMESTAMP).and_then(Avp::as_time),
            sip_response: find_avp(&children, ims::SIP_RESPONSE_TIMESTAMP).and_then(Avp::as_time),
        })
    }
}

/// Inter-Operator-Identifier group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterOperatorIdentifier {
    pub originating: Option<String>,
    pub terminating: Option<String>,
}

impl InterOperatorIdentifier {
    pub fn to_avp(&self) -> Avp {
        let mut children = Vec::new();
        if let Some(ioi) = &self.originating {
            children.push(v3_text(ims::ORIGINATING_IOI, ioi));
        }
        if let Some(ioi) = &self.terminating {
            children.push(v3_text(ims::TERMINATING_IOI, ioi));
        }
        v3(ims::INTER_OPERATOR_IDENTIFIER, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        let children = avp.children()?;
        Ok(Self {
            originating: text(&children, ims::ORIGINATING_IOI),
            terminating: text(&children, ims::TERMINATING_IOI),
        })
    }
}

/// Service-Specific-Info group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpecificInfo {
    pub data: String,
    pub kind: Option<u32>,
}

impl ServiceSpecificInfo {
    pub fn to_avp(&self) -> Avp {
        let mut children = vec![v3_text(ims::SERVICE_SPECIFIC_DATA, &self.data)];
        if let Some(kind) = self.kind {
            children.push(v3(ims::SERVICE_SPECIFIC_TYPE, AvpData::Unsigned32(kind)));
        }
        v3(ims::SERVICE_SPECIFIC_INFO, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        let children = avp.children()?;
        Ok(Self {
            data: text(&children, ims::SERVICE_SPECIFIC_DATA)
                .ok_or(DiameterError::MissingAvp("Service-Specific-Data"))?,
            kind: find_avp(&children, ims::SERVICE_SPECIFIC_TYPE).and_then(Avp::as_u32),
        })
    }
}

/// IMS-Information group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImsInformation {
    pub event_type: Option<EventType>,
    pub role_of_node: Direction,
    pub node_functionality: u32,
    pub user_session_id: Option<String>,
    pub outgoing_session_id: Option<String>,
    pub calling_party_address: Option<String>,
    pub called_party_address: Option<String>,
    pub app_provided_called_party: Option<String>,
    pub time_stamps: Option<TimeStamps>,
    pub inter_operator_identifiers: Vec<InterOperatorIdentifier>,
    pub ims_charging_identifier: Option<String>,
    pub service_specific_info: Vec<ServiceSpecificInfo>,
    pub cause_code: Option<i32>,
    pub access_network_information: Option<String>,
    pub incoming_trunk_group_id: Option<String>,
    pub outgoing_trunk_group_id: Option<String>,
}

impl ImsInformation {
    pub fn new(role_of_node: Direction, node_functionality: u32) -> Self {
        Self {
            event_type: None,
            role_of_node,
            node_functionality,
            user_session_id: None,
            outgoing_session_id: None,
            calling_party_address: None,
            called_party_address: None,
            app_provided_called_party: None,
            time_stamps: None,
            inter_operator_identifiers: Vec::new(),
            ims_charging_identifier: None,
            service_specific_info: Vec::new(),
            cause_code: None,
            access_network_information: None,
            incoming_trunk_group_id: None,
            outgoing_trunk_group_id: None,
        }
    }

    pub fn to_avp(&self) -> Avp {
        let role = match self.role_of_node {
            Direction::Originating => ims::ROLE_ORIGINATING,
            Direction::Terminating => ims::ROLE_TERMINATING,
        };

        let mut children = Vec::new();
        if let Some(event_type) = &self.event_type {
            children.push(event_type.to_avp());
        }
        children.push(v3(ims::ROLE_OF_NODE, AvpData::Enumerated(role)));
        children.push(v3(
            ims::NODE_FUNCTIONALITY,
            AvpData::Enumerated(self.node_functionality as i32),
        ));
        if let Some(id) = &self.user_session_id {
            children.push(v3_text(ims::USER_SESSION_ID, id));
        }
        if let Some(id) = &self.outgoing_session_id {
            children.push(v3_text(ims::OUTGOING_SESSION_ID, id));
        }
        if let Some(calling) = &self.calling_party_address {
            children.push(v3_text(ims::CALLING_PARTY_ADDRESS, calling));
        }
        if let Some(called) = &self.called_party_address {
            children.push(v3_text(ims::CALLED_PARTY_ADDRESS, called));
        }
        if let Some(party) = &self.app_provided_called_party {
            children.push(v3_text(ims::APPLICATION_PROVIDED_CALLED_PARTY_ADDRESS, party));
        }
        if let Some(stamps) = &self.time_stamps {
            children.push(stamps.to_avp());
        }
        for ioi in &self.inter_operator_identifiers {
            children.push(ioi.to_avp());
        }
        if let Some(icid) = &self.ims_charging_identifier {
            children.push(v3_text(ims::IMS_CHARGING_IDENTIFIER, icid));
        }
        for info in &self.service_specific_info {
            children.push(info.to_avp());
        }
        if let Some(cause) = self.cause_code {
            children.push(v3(ims::CAUSE_CODE, AvpData::Integer32(cause)));
        }
        if let Some(pani) = &self.access_network_information {
            children.push(v3(
                ims::ACCESS_NETWORK_INFORMATION,
                AvpData::OctetString(Bytes::from(pani.clone().into_bytes())),
            ));
        }
        if self.incoming_trunk_group_id.is_some() || self.outgoing_trunk_group_id.is_some() {
            let mut trunk = Vec::new();
            if let Some(id) = &self.incoming_trunk_group_id {
                trunk.push(v3_text(ims::INCOMING_TRUNK_GROUP_ID, id));
            }
            if let Some(id) = &self.outgoing_trunk_group_id {
                trunk.push(v3_text(ims::OUTGOING_TRUNK_GROUP_ID, id));
            }
            children.push(v3(ims::TRUNK_GROUP_ID, AvpData::Grouped(trunk)));
        }

        v3(ims::IMS_INFORMATION, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        expect_code(avp, ims::IMS_INFORMATION, "IMS-Information")?;
        let children = avp.children()?;

        let role_of_node = match find_avp(&children, ims::ROLE_OF_NODE).and_then(Avp::as_i32) {
            Some(ims::ROLE_ORIGINATING) => Direction::Originating,
            Some(ims::ROLE_TERMINATING) => Direction::Terminating,
            Some(other) => {
                return Err(DiameterError::InvalidAvpValue {
                    avp: "Role-Of-Node",
                    reason: other.to_string(),
                })
            }
            None => return Err(DiameterError::MissingAvp("Role-Of-Node")),
        };
        let node_functionality = find_avp(&children, ims::NODE_FUNCTIONALITY)
            .and_then(Avp::as_u32)
            .ok_or(DiameterError::MissingAvp("Node-Functionality"))?;

        let mut info = Self::new(role_of_node, node_functionality);
        info.event_type = find_avp(&children, ims::EVENT_TYPE)
            .map(EventType::from_avp)
            .transpose()?;
        info.user_session_id = text(&children, ims::USER_SESSION_ID);
        info.outgoing_session_id = text(&children, ims::OUTGOING_SESSION_ID);
        info.calling_party_address = text(&children, ims::CALLING_PARTY_ADDRESS);
        info.called_party_address = text(&children, ims::CALLED_PARTY_ADDRESS);
        info.app_provided_called_party =
            text(&children, ims::APPLICATION_PROVIDED_CALLED_PARTY_ADDRESS);
        info.time_stamps = find_avp(&children, ims::TIME_STAMPS)
            .map(TimeStamps::from_avp)
            .transpose()?;
        info.inter_operator_identifiers = find_all_avps(&children, ims::INTER_OPERATOR_IDENTIFIER)
            .into_iter()
            .map(InterOperatorIdentifier::from_avp)
            .collect::<DiameterResult<_>>()?;
        info.ims_charging_identifier = text(&children, ims::IMS_CHARGING_IDENTIFIER);
        info.service_specific_info = find_all_avps(&children, ims::SERVICE_SPECIFIC_INFO)
            .into_iter()
            .map(ServiceSpecificInfo::from_avp)
            .collect::<DiameterResult<_>>()?;
        info.cause_code = find_avp(&children, ims::CAUSE_CODE).and_then(Avp::as_i32);
        info.access_network_information = text(&children, ims::ACCESS_NETWORK_INFORMATION);

        if let Some(trunk) = find_avp(&children, ims::TRUNK_GROUP_ID) {
            let trunk = trunk.children()?;
            info.incoming_trunk_group_id = text(&trunk, ims::INCOMING_TRUNK_GROUP_ID);
            info.outgoing_trunk_group_id = text(&trunk, ims::OUTGOING_TRUNK_GROUP_ID);
        }

        Ok(info)
    }
}

/// Service-Information group: subscription ids plus IMS information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInformation {
    pub subscription_ids: Vec<SubscriptionId>,
    pub ims: Option<ImsInformation>,
}

impl ServiceInformation {
    pub fn to_avp(&self) -> Avp {
        let mut children: Vec<Avp> = self.subscription_ids.iter().map(SubscriptionId::to_avp).collect();
        if let Some(ims) = &self.ims {
            children.push(ims.to_avp());
        }
        v3(ims::SERVICE_INFORMATION, AvpData::Grouped(children))
    }

    pub fn from_avp(avp: &Avp) -> DiameterResult<Self> {
        expect_code(avp, ims::SERVICE_INFORMATION, "Service-Information")?;
        let children = avp.children()?;
        Ok(Self {
            subscription_ids: find_all_avps(&children, cc::SUBSCRIPTION_ID)
                .into_iter()
                .map(SubscriptionId::from_avp)
                .collect::<DiameterResult<_>>()?,
            ims: find_avp(&children, ims::IMS_INFORMATION)
                .map(ImsInformation::from_avp)
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use chrono::TimeZone;

    fn over_the_wire(avp: &Avp) -> Avp {
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);
        Avp::decode(&mut buf.freeze()).unwrap()
    }

    fn sample_ims() -> ImsInformation {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap();
        let mut info = ImsInformation::new(Direction::Terminating, 0);
        info.event_type = Some(EventType {
            sip_method: Some("INVITE".to_string()),
            event: Some("call".to_string()),
            expires: Some(3600),
        });
        info.user_session_id = Some("a84b4c76e66710@pc33".to_string());
        info.calling_party_address = Some("sip:alice@ims.test".to_string());
        info.called_party_address = Some("tel:+15550100".to_string());
        info.time_stamps = Some(TimeStamps {
            sip_request: Some(at),
            sip_response: None,
        });
        info.inter_operator_identifiers.push(InterOperatorIdentifier {
            originating: Some("orig.ioi".to_string()),
            terminating: None,
        });
        info.ims_charging_identifier = Some("icid-1".to_string());
        info.service_specific_info.push(ServiceSpecificInfo {
            data: "gold".to_string(),
            kind: Some(7),
        });
        info.cause_code = Some(0);
        info.access_network_information = Some("3GPP-E-UTRAN-FDD".to_string());
        info.incoming_trunk_group_id = Some("trunk-in".to_string());
        info
    }

    #[test]
    fn test_subscription_id_from_identity() {
        let tel = SubscriptionId::from_identity("TEL:+15550100");
        assert_eq!(tel.kind, SubscriptionIdType::EndUserE164);
        assert_eq!(tel.data, "+15550100");

        let sip = SubscriptionId::from_identity("sip:bob@ims.test");
        assert_eq!(sip.kind, SubscriptionIdType::EndUserSipUri);
        assert_eq!(sip.data, "sip:bob@ims.test");

        let short = SubscriptionId::from_identity("te");
        assert_eq!(short.kind, SubscriptionIdType::EndUserSipUri);
    }

    #[test]
    fn test_service_information_survives_the_wire() {
        let info = ServiceInformation {
            subscription_ids: vec![SubscriptionId::from_identity("tel:+15550100")],
            ims: Some(sample_ims()),
        };
        let decoded = ServiceInformation::from_avp(&over_the_wire(&info.to_avp())).unwrap();
        assert_eq!(decoded, info);

        let ims = decoded.ims.unwrap();
        assert_eq!(
            ims.event_type.and_then(|e| e.sip_method),
            Some("INVITE".to_string())
        );
        assert_eq!(
            ims.time_stamps.and_then(|t| t.sip_request),
            Some(Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_ims_information_requires_role() {
        let broken = v3(ims::IMS_INFORMATION, AvpData::Grouped(vec![]));
        assert!(matches!(
            ImsInformation::from_avp(&broken),
            Err(DiameterError::MissingAvp("Role-Of-Node"))
        ));
    }
}
