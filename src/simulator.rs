// src/simulator.rs
//! Simulated charging system and call layer
//!
//! Lets the engine run end to end without an OCS or a SIP stack:
//! - `SimulatedChargingSystem` answers credit-control requests from
//!   per-subscriber balances held in memory
//! - `SimulatedCallLayer` plays the configured calls through the engine and
//!   hangs them up early when the engine asks it to

use async_trait::async_trait;
use parking_lot::Mutex;
use ro_core::config::{SimulatedCallConfig, SimulatorConfig};
use ro_core::models::{Direction, MediaKind, PartyIdentities, RoutingKeys, TerminationCause};
use ro_core::traits::CallControl;
use ro_core::ChargingError;
use ro_diameter::{
    CcRequestType, CreditControlAnswer, CreditControlPeer, CreditControlRequest, DiameterMessage,
    FinalUnitIndication, MsccAnswer, PeerError, ResultCode,
};
use ro_services::{ChargingEngine, InitialReservationRequest, ReservationOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const SIM_ORIGIN_HOST: &str = "ocs.sim.local";
const SIM_ORIGIN_REALM: &str = "sim.local";

/// Units granted when a request does not ask for a specific amount
const DEFAULT_BLOCK_SECS: u32 = 30;

/// In-memory online charging system
pub struct SimulatedChargingSystem {
    default_balance: i64,
    validity_secs: u32,
    balances: Mutex<HashMap<String, i64>>,
    /// Units reserved per Session-Id and the subscriber they were taken from
    reservations: Mutex<HashMap<String, (String, i64)>>,
}

impl SimulatedChargingSystem {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            default_balance: config.default_balance_secs,
            validity_secs: config.validity_secs,
            balances: Mutex::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Remaining unreserved balance of a subscriber
    pub fn balance(&self, subscriber: &str) -> i64 {
        self.balances
            .lock()
            .get(subscriber)
            .copied()
            .unwrap_or(self.default_balance)
    }

    /// Return the unused part of the session's reservation to the subscriber
    fn settle(&self, session_id: &str, used: i64) {
        let Some((subscriber, reserved)) = self.reservations.lock().remove(session_id) else {
            return;
        };
        let mut balances = self.balances.lock();
        let balance = balances
            .entry(subscriber)
            .or_insert(self.default_balance);
        *balance += reserved - used;
    }

    fn reserve(&self, session_id: &str, subscriber: &str, requested: u32) -> Option<(u32, bool)> {
        let mut balances = self.balances.lock();
        let balance = balances
            .entry(subscriber.to_string())
            .or_insert(self.default_balance);
        if *balance <= 0 {
            return None;
        }
        let granted = i64::from(requested).min(*balance);
        *balance -= granted;
        let last_block = *balance == 0;
        self.reservations
            .lock()
            .insert(session_id.to_string(), (subscriber.to_string(), granted));
        Some((granted as u32, last_block))
    }

    fn answer(&self, request: &CreditControlRequest) -> CreditControlAnswer {
        let mut answer = CreditControlAnswer::new(request.session_id.clone(), ResultCode::Success.as_u32());
        answer.origin_host = Some(SIM_ORIGIN_HOST.to_string());
        answer.origin_realm = Some(SIM_ORIGIN_REALM.to_string());
        answer.request_type = Some(request.request_type);
        answer.request_number = Some(request.request_number);

        let subscriber = request
            .subscription_id
            .as_ref()
            .map(|s| s.data.clone())
            .unwrap_or_default();
        let mscc = request.mscc.clone().unwrap_or_default();
        let used = i64::from(mscc.used_secs.unwrap_or(0));

        if matches!(request.request_type, CcRequestType::Update | CcRequestType::Termination) {
            self.settle(&request.session_id, used);
        }
        if request.request_type == CcRequestType::Termination {
            info!(
                session_id = %request.session_id,
                subscriber = %subscriber,
                used,
                balance = self.balance(&subscriber),
                "SIMULATOR: session closed"
            );
            return answer;
        }

        let requested = mscc.requested_secs.unwrap_or(DEFAULT_BLOCK_SECS);
        match self.reserve(&request.session_id, &subscriber, requested) {
            None => {
                warn!(subscriber = %subscriber, "SIMULATOR: balance exhausted");
                answer.result_code = ResultCode::CreditLimitReached.as_u32();
            }
            Some((granted, last_block)) => {
                answer.mscc = Some(MsccAnswer {
                    result_code: Some(ResultCode::Success.as_u32()),
                    granted_secs: Some(granted),
                    validity_time: Some(self.validity_secs),
                    rating_group: mscc.rating_group,
                    service_identifier: mscc.service_identifier,
                    final_unit_indication: last_block.then(FinalUnitIndication::terminate),
                });
                info!(
                    subscriber = %subscriber,
                    granted,
                    last_block,
                    "SIMULATOR: credit granted"
                );
            }
        }
        answer
    }
}

#[async_trait]
impl CreditControlPeer for SimulatedChargingSystem {
    async fn send(
        &self,
        request: DiameterMessage,
        _destination: Option<&str>,
    ) -> Result<DiameterMessage, PeerError> {
        let parsed = CreditControlRequest::from_message(&request)
            .map_err(|e| PeerError::Transport(format!("simulator rejected request: {}", e)))?;
        Ok(self.answer(&parsed).to_message(&request))
    }
}

/// Call layer that only knows how to hang up the calls it is playing
#[derive(Default)]
pub struct SimulatedCallLayer {
    calls: Mutex<HashMap<RoutingKeys, CancellationToken>>,
}

impl SimulatedCallLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, routing: RoutingKeys) -> CancellationToken {
        let token = CancellationToken::new();
        self.calls.lock().insert(routing, token.clone());
        token
    }

    fn forget(&self, routing: RoutingKeys) {
        self.calls.lock().remove(&routing);
    }
}

#[async_trait]
impl CallControl for SimulatedCallLayer {
    async fn terminate_call(
        &self,
        routing: RoutingKeys,
        call_id: &str,
        cause: &TerminationCause,
    ) -> Result<(), ChargingError> {
        let token = self.calls.lock().get(&routing).cloned();
        match token {
            Some(token) => {
                info!(call_id, cause = %cause, "SIMULATOR: hanging up call");
                token.cancel();
                Ok(())
            }
            None => Err(ChargingError::SessionNotFound(call_id.to_string())),
        }
    }
}

type SimEngine = ChargingEngine<SimulatedChargingSystem, SimulatedCallLayer>;

/// Play every configured call concurrently; resolves once all are over
///
/// Cancelling `traffic` hangs up every call still in progress. Each call
/// reports its teardown before this returns, so the engine can be shut down
/// afterwards with no STOP left to send.
pub async fn run_calls(
    engine: Arc<SimEngine>,
    layer: Arc<SimulatedCallLayer>,
    calls: Vec<SimulatedCallConfig>,
    traffic: CancellationToken,
) {
    let mut set = JoinSet::new();
    for (index, call) in calls.into_iter().enumerate() {
        let routing = RoutingKeys::new(index as u32 + 1, 1);
        set.spawn(run_call(
            Arc::clone(&engine),
            Arc::clone(&layer),
            routing,
            call,
            traffic.clone(),
        ));
    }
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            warn!("SIMULATOR: call task failed: {}", e);
        }
    }
    info!("SIMULATOR: all calls finished");
}

async fn run_call(
    engine: Arc<SimEngine>,
    layer: Arc<SimulatedCallLayer>,
    routing: RoutingKeys,
    call: SimulatedCallConfig,
    shutdown: CancellationToken,
) {
    let call_id = Uuid::new_v4().to_string();
    info!(call_id = %call_id, caller = %call.caller, callee = %call.callee, "SIMULATOR: starting call");

    let request = InitialReservationRequest {
        call_id: call_id.clone(),
        direction: Direction::Originating,
        identities: PartyIdentities::new(call.caller.clone(), call.callee.clone()),
        charging_vector: None,
        routing,
        media: if call.video {
            MediaKind::Video
        } else {
            MediaKind::Voice
        },
        service_identifier: None,
        rating_group: None,
        reservation_secs: call.reservation_secs,
    };
    let handle = match engine.controller().request_initial_reservation(request).await {
        ReservationOutcome::Proceed { handle, .. } => handle,
        ReservationOutcome::Deny { result_code } => {
            warn!(call_id = %call_id, result_code, "SIMULATOR: call rejected");
            return;
        }
        ReservationOutcome::Error { reason } => {
            warn!(call_id = %call_id, reason = %reason, "SIMULATOR: call failed");
            return;
        }
    };

    let hangup = layer.track(routing);
    let coordinator = engine.coordinator();

    // Ringing
    tokio::select! {
        _ = hangup.cancelled() => {}
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(call.ring_secs)) => {
            coordinator.on_confirmed(handle);
            // Talking
            tokio::select! {
                _ = hangup.cancelled() => {}
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(call.duration_secs)) => {}
            }
        }
    }

    let (code, reason) = if hangup.is_cancelled() {
        (503, "Terminated by charging")
    } else if shutdown.is_cancelled() {
        (503, "Service shutting down")
    } else {
        (200, "Normal call clearing")
    };
    let outcome = coordinator.on_terminated(handle, code, reason);
    layer.forget(routing);
    info!(call_id = %call_id, outcome = ?outcome, "SIMULATOR: call ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ro_core::config::AppConfig;
    use ro_core::ManualClock;
    use ro_diameter::{MsccRequest, SubscriptionId};

    fn system(balance: i64) -> SimulatedChargingSystem {
        SimulatedChargingSystem::new(&SimulatorConfig {
            default_balance_secs: balance,
            validity_secs: 600,
            calls: Vec::new(),
        })
    }

    fn request(kind: CcRequestType, number: u32, requested: Option<u32>, used: Option<u32>) -> CreditControlRequest {
        let mut request = CreditControlRequest::new("sim;1;1", kind, number);
        request.subscription_id = Some(SubscriptionId::from_identity("sip:alice@ims.test"));
        request.mscc = Some(MsccRequest {
            requested_secs: requested,
            used_secs: used,
            ..Default::default()
        });
        request
    }

    async fn exchange(ocs: &SimulatedChargingSystem, request: CreditControlRequest) -> CreditControlAnswer {
        let reply = ocs.send(request.to_message(), None).await.unwrap();
        CreditControlAnswer::from_message(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_balance_is_drawn_down_in_blocks() {
        let ocs = system(50);

        let first = exchange(&ocs, request(CcRequestType::Initial, 0, Some(30), None)).await;
        let grant = first.grant().unwrap();
        assert_eq!(grant.granted_secs, 30);
        assert_eq!(grant.validity_secs, 600);
        assert!(!grant.is_final_allocation());

        // 30 used, 20 left: the last block is final
        let second = exchange(&ocs, request(CcRequestType::Update, 1, Some(30), Some(30))).await;
        let grant = second.grant().unwrap();
        assert_eq!(grant.granted_secs, 20);
        assert!(grant.is_final_allocation());

        let third = exchange(&ocs, request(CcRequestType::Update, 2, Some(30), Some(20))).await;
        assert_eq!(third.result_code, 4012);

        let stop = exchange(&ocs, request(CcRequestType::Termination, 3, None, Some(0))).await;
        assert_eq!(stop.result_code, 2001);
        assert_eq!(ocs.balance("sip:alice@ims.test"), 0);
    }

    #[tokio::test]
    async fn test_unused_credit_is_refunded() {
        let ocs = system(100);
        exchange(&ocs, request(CcRequestType::Initial, 0, Some(30), None)).await;
        assert_eq!(ocs.balance("sip:alice@ims.test"), 70);
        exchange(&ocs, request(CcRequestType::Termination, 1, None, Some(12))).await;
        assert_eq!(ocs.balance("sip:alice@ims.test"), 88);
    }

    #[tokio::test]
    async fn test_stopping_traffic_settles_every_call() {
        let config = AppConfig::default();
        let ocs = Arc::new(system(100));
        let layer = Arc::new(SimulatedCallLayer::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()));
        let engine = Arc::new(ChargingEngine::new(
            config,
            Arc::clone(&ocs),
            Arc::clone(&layer),
            clock,
            None,
        ));

        let traffic = CancellationToken::new();
        let call = SimulatedCallConfig {
            caller: "sip:alice@ims.test".to_string(),
            callee: "sip:bob@ims.test".to_string(),
            video: false,
            ring_secs: 0,
            duration_secs: 3600,
            reservation_secs: Some(40),
        };
        let simulation = tokio::spawn(run_calls(
            Arc::clone(&engine),
            layer,
            vec![call],
            traffic.clone(),
        ));

        for _ in 0..200 {
            if engine.stats().active_sessions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.stats().active_sessions, 1);
        assert_eq!(ocs.balance("sip:alice@ims.test"), 60);

        traffic.cancel();
        tokio_test::assert_ok!(simulation.await);
        engine.shutdown().await;

        // STOP reached the OCS and returned the whole reservation
        assert_eq!(ocs.balance("sip:alice@ims.test"), 100);
        assert!(engine.registry().is_empty());
        assert_eq!(engine.stats().final_successful, 1);
    }

    #[tokio::test]
    async fn test_terminate_unknown_call_fails() {
        let layer = SimulatedCallLayer::new();
        let routing = RoutingKeys::new(1, 1);
        let cause = TerminationCause::CreditExhausted;
        tokio_test::assert_err!(layer.terminate_call(routing, "x", &cause).await);

        let token = layer.track(routing);
        tokio_test::assert_ok!(layer.terminate_call(routing, "x", &cause).await);
        assert!(token.is_cancelled());
    }
}
