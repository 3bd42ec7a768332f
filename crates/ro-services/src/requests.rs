//! Credit-Control-Request composition from session state

use chrono::{DateTime, Utc};
use ro_core::config::{ChargingConfig, DiameterConfig};
use ro_core::models::{ChargingSession, TerminationCause};
use ro_diameter::ccr::VendorTermination;
use ro_diameter::dictionary::base;
use ro_diameter::{
    CcRequestType, CreditControlRequest, EventType, ImsInformation, InterOperatorIdentifier,
    MsccRequest, ServiceInformation, SubscriptionId, TimeStamps,
};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::INITIAL_REQUEST_NUMBER;

/// Session-Id values of the form `<origin-host>;<high>;<low>`
///
/// The high part is fixed at startup and the low part increments, so ids
/// stay unique across restarts of the same host.
#[derive(Debug)]
pub struct SessionIdGenerator {
    origin_host: String,
    high: u32,
    low: AtomicU32,
}

impl SessionIdGenerator {
    pub fn new(origin_host: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            origin_host: origin_host.into(),
            high: started_at.timestamp() as u32,
            low: AtomicU32::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let low = self.low.fetch_add(1, Ordering::Relaxed);
        format!("{};{};{}", self.origin_host, self.high, low)
    }
}

/// Builds the three request kinds of a charging session
#[derive(Debug, Clone)]
pub struct RequestComposer {
    diameter: DiameterConfig,
    charging: ChargingConfig,
}

impl RequestComposer {
    pub fn new(diameter: DiameterConfig, charging: ChargingConfig) -> Self {
        Self { diameter, charging }
    }

    /// INITIAL asking for `requested_secs`, or the configured default
    pub fn initial(
        &self,
        session: &ChargingSession,
        now: DateTime<Utc>,
        requested_secs: Option<u32>,
    ) -> CreditControlRequest {
        let mut request = self.base(session, CcRequestType::Initial, INITIAL_REQUEST_NUMBER, now);
        request.mscc = Some(MsccRequest {
            requested_secs: Some(requested_secs.unwrap_or(self.charging.initial_request_credits)),
            ..self.mscc(session)
        });
        request
    }

    /// UPDATE reporting `used` seconds; uses the session's current request number
    pub fn interim(&self, session: &ChargingSession, now: DateTime<Utc>, used: i64) -> CreditControlRequest {
        let mut request = self.base(session, CcRequestType::Update, session.hop_by_hop, now);
        request.mscc = Some(MsccRequest {
            requested_secs: Some(self.charging.interim_request_credits),
            used_secs: Some(clamp_secs(used)),
            ..self.mscc(session)
        });
        request
    }

    /// TERMINATION reporting `used` seconds; uses the session's current request number
    pub fn stop(
        &self,
        session: &ChargingSession,
        now: DateTime<Utc>,
        used: i64,
        cause: &TerminationCause,
    ) -> CreditControlRequest {
        let mut request = self.base(session, CcRequestType::Termination, session.hop_by_hop, now);
        request.mscc = Some(MsccRequest {
            used_secs: Some(clamp_secs(used)),
            ..self.mscc(session)
        });
        request.termination_cause = Some(base::TERMINATION_CAUSE_LOGOUT);
        if let Some(ims) = request
            .service_information
            .as_mut()
            .and_then(|info| info.ims.as_mut())
        {
            ims.cause_code = Some(cause.ims_cause_code());
        }
        if self.charging.vendor_specific_chargeinfo {
            request.vendor_termination = Some(VendorTermination {
                vendor_id: self.charging.vendor_specific_id,
                code: cause.code(),
                reason: cause.reason().to_string(),
            });
        }
        request
    }

    fn mscc(&self, session: &ChargingSession) -> MsccRequest {
        MsccRequest {
            requested_secs: None,
            used_secs: None,
            rating_group: Some(session.rating_group),
            service_identifier: Some(session.service_identifier),
        }
    }

    fn base(
        &self,
        session: &ChargingSession,
        kind: CcRequestType,
        number: u32,
        now: DateTime<Utc>,
    ) -> CreditControlRequest {
        let subscription = SubscriptionId::from_identity(session.subscription_identity());

        let mut request = CreditControlRequest::new(session.session_id.clone(), kind, number);
        request.origin_host = self.diameter.origin_host.clone();
        request.origin_realm = self.diameter.origin_realm.clone();
        request.destination_realm = self.diameter.destination_realm.clone();
        request.destination_host = self.diameter.destination_host.clone();
        request.service_context_id = self.diameter.service_context_id();
        request.user_name = Some(subscription.data.clone());
        request.event_timestamp = Some(now);
        request.user_equipment_mac = Some(
            session
                .identities
                .mac
                .clone()
                .unwrap_or_else(|| self.charging.default_mac.clone()),
        );
        request.subscription_id = Some(subscription.clone());
        request.service_information = Some(ServiceInformation {
            subscription_ids: vec![subscription],
            ims: Some(self.ims_information(session, kind, now)),
        });
        request
    }

    fn ims_information(
        &self,
        session: &ChargingSession,
        kind: CcRequestType,
        now: DateTime<Utc>,
    ) -> ImsInformation {
        let identities = &session.identities;
        let mut ims = ImsInformation::new(session.direction, self.diameter.node_functionality);
        ims.event_type = Some(EventType::sip_method(kind.sip_method()));
        ims.user_session_id = Some(session.call_id.clone());
        ims.calling_party_address = Some(identities.asserted_identity.clone());
        ims.called_party_address = Some(identities.called_asserted_identity.clone());
        ims.app_provided_called_party = identities.app_provided_party.clone();
        ims.time_stamps = Some(match kind {
            CcRequestType::Initial | CcRequestType::Event => TimeStamps {
                sip_request: Some(now),
                sip_response: None,
            },
            _ => TimeStamps {
                sip_request: session.start_time,
                sip_response: Some(now),
            },
        });
        if let Some(vector) = &session.charging_vector {
            if vector.originating_ioi.is_some() || vector.terminating_ioi.is_some() {
                ims.inter_operator_identifiers.push(InterOperatorIdentifier {
                    originating: vector.originating_ioi.clone(),
                    terminating: vector.terminating_ioi.clone(),
                });
            }
            ims.ims_charging_identifier = vector.icid.clone();
        }
        ims.access_network_information = identities.access_network_info.clone();
        ims.incoming_trunk_group_id = identities.incoming_trunk_id.clone();
        ims.outgoing_trunk_group_id = identities.outgoing_trunk_id.clone();
        ims
    }
}

fn clamp_secs(secs: i64) -> u32 {
    secs.clamp(0, i64::from(u32::MAX)) as u32
}
