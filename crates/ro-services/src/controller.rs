//! Reauthorization controller
//!
//! Drives the credit-control exchanges of every session:
//! - INITIAL reservation before the call is routed
//! - UPDATE (interim) requests whenever the session timer fires
//! - TERMINATION (STOP) exactly once when the session ends
//!
//! Session state is only touched under its bucket lock; the exchanges
//! themselves run outside every lock as tasks on a `TaskTracker`, and the
//! shutdown token cancels any exchange still waiting for an answer.

use chrono::{DateTime, Utc};
use ro_core::config::{ChargingConfig, DiameterConfig, LatencyLogLevel};
use ro_core::models::{
    ActiveState, ChargingSession, ChargingVector, CreditGrant, Direction, DirtyState,
    FinalUnitAction, MediaKind, PartyIdentities, RedirectTarget, RoutingKeys, SessionParams,
    SessionState, TerminationCause,
};
use ro_core::traits::CallControl;
use ro_core::{ChargingError, ChargingResult, Clock};
use ro_diameter::{
    CcRequestType, CreditControlAnswer, CreditControlPeer, CreditControlRequest, PeerError,
    ResultCode, CREDIT_CONTROL_APPLICATION_ID,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::billing;
use crate::constants::AUTH_SESSION_STATE_NO_STATE;
use crate::persistence::PersistenceSink;
use crate::registry::{SessionHandle, SessionMut, SessionRegistry};
use crate::requests::{RequestComposer, SessionIdGenerator};
use crate::stats::ChargingStats;
use crate::timer::{RemoveOutcome, TimerWheel};

/// Everything needed to open a charging session for one call leg
#[derive(Debug, Clone)]
pub struct InitialReservationRequest {
    pub call_id: String,
    pub direction: Direction,
    pub identities: PartyIdentities,
    pub charging_vector: Option<ChargingVector>,
    pub routing: RoutingKeys,
    pub media: MediaKind,
    /// Overrides the media default
    pub service_identifier: Option<u32>,
    /// Overrides the media default
    pub rating_group: Option<u32>,
    /// Seconds to request; `None` asks for the configured initial amount
    pub reservation_secs: Option<u32>,
}

/// Result of the INITIAL exchange
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    /// Route the call; the session is linked and waits for confirmation
    Proceed {
        handle: SessionHandle,
        session_id: String,
        grant: CreditGrant,
        reused: bool,
    },
    /// The charging system refused the reservation
    Deny { result_code: u32 },
    /// No usable answer arrived
    Error { reason: String },
}

/// Identifies a session from the signaling side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    pub dialog_entry: u32,
    pub call_id: String,
    /// `None` matches either leg
    pub direction: Option<Direction>,
}

/// Result of starting the billing clock on call confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingStart {
    Started { delay_secs: i64 },
    /// The session was already active
    Duplicate,
    AlreadyTerminated,
    Unknown,
}

/// What happened to the session timer during finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDisposition {
    /// The session never became active; no removal was attempted
    NotActive,
    Removed,
    NotLinked,
    Inconsistent,
}

impl From<RemoveOutcome> for TimerDisposition {
    fn from(outcome: RemoveOutcome) -> Self {
        match outcome {
            RemoveOutcome::Removed => TimerDisposition::Removed,
            RemoveOutcome::NotLinked => TimerDisposition::NotLinked,
            RemoveOutcome::Inconsistent => TimerDisposition::Inconsistent,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// STOP was queued
    Stopped { timer: TimerDisposition },
    /// STOP had already been sent for this session
    AlreadyStopped,
    /// No such session
    Unknown,
}

enum TimerAction {
    Nothing,
    Interim(CreditControlRequest),
    Terminate(RoutingKeys, String, TerminationCause),
}

/// Credit-control state machine for all sessions
pub struct ReauthorizationController<P: CreditControlPeer, C: CallControl> {
    registry: Arc<SessionRegistry>,
    timers: Arc<TimerWheel<SessionHandle>>,
    peer: Arc<P>,
    calls: Arc<C>,
    clock: Arc<dyn Clock>,
    charging: ChargingConfig,
    diameter: DiameterConfig,
    composer: RequestComposer,
    session_ids: SessionIdGenerator,
    stats: Arc<ChargingStats>,
    persistence: Option<PersistenceSink>,
    exchanges: TaskTracker,
    shutdown: CancellationToken,
}

impl<P: CreditControlPeer, C: CallControl> ReauthorizationController<P, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SessionRegistry>,
        peer: Arc<P>,
        calls: Arc<C>,
        clock: Arc<dyn Clock>,
        charging: ChargingConfig,
        diameter: DiameterConfig,
        stats: Arc<ChargingStats>,
        persistence: Option<PersistenceSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let timers = Arc::clone(registry.timers());
        let session_ids = SessionIdGenerator::new(diameter.origin_host.clone(), clock.now());
        let composer = RequestComposer::new(diameter.clone(), charging.clone());
        Self {
            registry,
            timers,
            peer,
            calls,
            clock,
            charging,
            diameter,
            composer,
            session_ids,
            stats,
            persistence,
            exchanges: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<ChargingStats> {
        &self.stats
    }

    /// Wait for every exchange started so far
    pub async fn settle(&self) {
        self.exchanges.close();
        self.exchanges.wait().await;
        self.exchanges.reopen();
    }

    fn persist(&self, session: &mut ChargingSession) {
        match &self.persistence {
            Some(sink) => sink.record(session),
            None => {
                session.take_dirty();
            }
        }
    }

    fn tariff(&self, request: &InitialReservationRequest) -> (u32, u32) {
        let (service, rating) = match request.media {
            MediaKind::Voice => (
                self.charging.voice_service_identifier,
                self.charging.voice_rating_group,
            ),
            MediaKind::Video => (
                self.charging.video_service_identifier,
                self.charging.video_rating_group,
            ),
        };
        (
            request.service_identifier.unwrap_or(service),
            request.rating_group.unwrap_or(rating),
        )
    }

    /// Send one request and wait for its answer, bounded by the transaction timeout
    async fn exchange(&self, request: CreditControlRequest) -> ChargingResult<CreditControlAnswer> {
        let kind = request.request_type;
        let session_id = request.session_id.clone();
        let message = request.to_message();
        let destination = self.diameter.forced_peer.as_deref();
        let timeout_ms = self.charging.transaction_timeout_ms;

        self.stats.record_sent(kind);
        let started = Instant::now();
        let sent = tokio::select! {
            _ = self.shutdown.cancelled() => Err(PeerError::Cancelled),
            answer = tokio::time::timeout(
                self.charging.transaction_timeout(),
                self.peer.send(message, destination),
            ) => answer.unwrap_or(Err(PeerError::Timeout(timeout_ms))),
        };

        let answer = match sent {
            Ok(answer) => answer,
            Err(e) => {
                if matches!(e, PeerError::Timeout(_)) {
                    self.stats.record_timeout();
                }
                warn!(session_id = %session_id, request_type = ?kind, "Exchange failed: {}", e);
                return Err(e.into());
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        record_answer_time(&self.stats, &self.charging, &session_id, kind, elapsed_ms);

        let answer = CreditControlAnswer::from_message(&answer).map_err(|e| {
            error!(session_id = %session_id, "Malformed answer: {}", e);
            ChargingError::from(e)
        })?;
        if answer.session_id != session_id {
            error!(
                session_id = %session_id,
                answered = %answer.session_id,
                "Answer belongs to another session"
            );
            return Err(ChargingError::Protocol(format!(
                "answer for {} received on {}",
                answer.session_id, session_id
            )));
        }
        Ok(answer)
    }

    /// Reserve initial credit for a call leg
    #[instrument(skip(self, request), fields(call_id = %request.call_id, direction = %request.direction))]
    pub async fn request_initial_reservation(
        self: &Arc<Self>,
        request: InitialReservationRequest,
    ) -> ReservationOutcome {
        if self.charging.single_session_per_dialog {
            if let Some(existing) = self.reuse_dialog_session(&request) {
                return existing;
            }
        }

        let now = self.clock.now();
        let requested_secs = request.reservation_secs;
        let (service_identifier, rating_group) = self.tariff(&request);
        let params = SessionParams {
            session_id: self.session_ids.next_id(),
            call_id: request.call_id,
            direction: request.direction,
            identities: request.identities,
            charging_vector: request.charging_vector,
            rating_group,
            service_identifier,
            routing: request.routing,
            origin_host: self.diameter.origin_host.clone(),
            auth_app_id: CREDIT_CONTROL_APPLICATION_ID,
            auth_session_type: AUTH_SESSION_STATE_NO_STATE,
        };

        let handle = match self.registry.create(params, now) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Cannot allocate charging session: {}", e);
                return ReservationOutcome::Error {
                    reason: e.to_string(),
                };
            }
        };

        let Some((session_id, ccr)) = self
            .registry
            .with_session(handle, |s| (s.session_id.clone(), self.composer.initial(s, now, requested_secs)))
        else {
            return ReservationOutcome::Error {
                reason: "session vanished before the initial request".to_string(),
            };
        };

        let grant = match self.exchange(ccr).await {
            Ok(answer) => match answer.grant() {
                Ok(grant) => grant,
                Err(rejection) => {
                    info!(session_id = %session_id, "Initial reservation denied: {}", rejection);
                    return self.abandon(
                        handle,
                        ReservationOutcome::Deny {
                            result_code: rejection.result_code(),
                        },
                    );
                }
            },
            Err(e) if e.is_denial() => {
                warn!(session_id = %session_id, "Initial answer unusable: {}", e);
                return self.abandon(
                    handle,
                    ReservationOutcome::Deny {
                        result_code: ResultCode::UnableToComply.as_u32(),
                    },
                );
            }
            Err(e) => {
                error!(session_id = %session_id, "Initial reservation failed: {}", e);
                return self.abandon(
                    handle,
                    ReservationOutcome::Error {
                        reason: e.to_string(),
                    },
                );
            }
        };
        self.stats.record_outcome(CcRequestType::Initial, true);

        if let Err(e) = self.registry.link(handle, 0) {
            error!(session_id = %session_id, "Cannot link session: {}", e);
            self.registry.unref(handle, 1);
            return ReservationOutcome::Error {
                reason: e.to_string(),
            };
        }
        let granted_at = self.clock.now();
        self.registry.with_session(handle, |s| {
            s.last_event_timestamp = granted_at;
            s.last_event_timestamp_backup = granted_at;
            s.reserved_secs = grant.granted_secs;
            s.valid_for = grant.validity_secs;
            s.is_final_allocation = grant.is_final_allocation();
            s.redirect_uri = grant.redirect.as_ref().map(|r| r.uri.clone());
            s.mark_dirty(DirtyState::New);
            self.persist(s);
            // Hand the session over to its registration
            s.release(1);
        });

        info!(
            session_id = %session_id,
            granted_secs = grant.granted_secs,
            validity_secs = grant.validity_secs,
            "Initial reservation granted"
        );
        ReservationOutcome::Proceed {
            handle,
            session_id,
            grant,
            reused: false,
        }
    }

    /// Drop a session that never got a usable grant; it dies with the creator reference
    fn abandon(&self, handle: SessionHandle, outcome: ReservationOutcome) -> ReservationOutcome {
        self.stats.record_outcome(CcRequestType::Initial, false);
        self.registry.unref(handle, 1);
        outcome
    }

    fn reuse_dialog_session(&self, request: &InitialReservationRequest) -> Option<ReservationOutcome> {
        let guard = self.registry.lookup_dialog(request.routing, request.direction)?;
        let found = guard.with(|s| {
            if s.is_terminated() || s.ccr_sent {
                return None;
            }
            Some((s.session_id.clone(), grant_of(s)))
        })??;
        debug!(session_id = %found.0, "Reusing dialog session");
        Some(ReservationOutcome::Proceed {
            handle: guard.handle(),
            session_id: found.0,
            grant: found.1,
            reused: true,
        })
    }

    /// Start billing once the call is answered
    #[instrument(skip(self))]
    pub fn start_billing(&self, handle: SessionHandle) -> BillingStart {
        let now = self.clock.now();
        let buffer = self.charging.timer_buffer_secs;
        let started = self.registry.with_session(handle, |s| {
            match s.active {
                ActiveState::Active => {
                    error!(session_id = %s.session_id, "Call confirmed twice, ignoring");
                    return BillingStart::Duplicate;
                }
                ActiveState::Terminated => return BillingStart::AlreadyTerminated,
                ActiveState::NotYetActive => {}
            }

            let since_grant = billing::rounded_secs(s.last_event_timestamp, now);
            s.start_time = Some(now);
            s.last_event_timestamp = now;
            let window = billing::initial_window(s.reserved_secs, s.valid_for, since_grant);
            s.reserved_secs = window;
            s.state = if s.is_final_allocation {
                SessionState::NoMoreCredit
            } else {
                SessionState::Answered
            };
            s.advance_active(ActiveState::Active);

            let delay = billing::timer_delay(window, buffer, s.is_final_allocation);
            if let Err(e) = s.arm(delay) {
                error!(session_id = %s.session_id, "Cannot arm session timer: {}", e);
            }
            s.mark_dirty(DirtyState::Changed);
            self.persist(s);
            info!(session_id = %s.session_id, window, delay, "Billing started");
            BillingStart::Started { delay_secs: delay }
        });

        match started {
            Some(outcome @ BillingStart::Started { .. }) => {
                self.stats.session_started();
                outcome
            }
            Some(outcome) => outcome,
            None => BillingStart::Unknown,
        }
    }

    /// Timer entrypoint, called once per expired session
    ///
    /// The wheel has already detached the timer; its reference is released
    /// here or handed to the interim exchange.
    pub async fn on_timer_expired(self: &Arc<Self>, handle: SessionHandle) {
        let now = self.clock.now();
        let action = self.registry.with_session(handle, |s| {
            if !s.is_active() {
                s.release(1);
                return TimerAction::Nothing;
            }
            match s.state {
                SessionState::Answered => {
                    if s.exchange_in_flight {
                        warn!(session_id = %s.session_id, "Interim request still in flight");
                        s.release(1);
                        return TimerAction::Nothing;
                    }
                    let used = billing::rounded_secs(s.last_event_timestamp, now);
                    let call_time = s
                        .start_time
                        .map(|start| billing::rounded_secs(start, now))
                        .unwrap_or(used);
                    let used = billing::reconcile_usage(s.billed_secs, used, call_time);

                    s.billed_secs += used;
                    s.pending_usage_secs = used;
                    s.last_event_timestamp_backup = s.last_event_timestamp;
                    s.last_event_timestamp = now;
                    s.hop_by_hop += 1;
                    s.exchange_in_flight = true;
                    debug!(session_id = %s.session_id, used, billed = s.billed_secs, "Sending interim request");
                    TimerAction::Interim(self.composer.interim(s, now, used))
                }
                SessionState::NoMoreCredit => TimerAction::Terminate(
                    s.routing,
                    s.call_id.clone(),
                    TerminationCause::CreditExhausted,
                ),
                SessionState::UnknownError => TimerAction::Terminate(
                    s.routing,
                    s.call_id.clone(),
                    TerminationCause::ChargingFailure,
                ),
                SessionState::Pending => {
                    s.release(1);
                    TimerAction::Nothing
                }
            }
        });

        match action {
            None => debug!(handle = ?handle, "Timer fired for a destroyed session"),
            Some(TimerAction::Nothing) => {}
            Some(TimerAction::Interim(request)) => {
                let this = Arc::clone(self);
                self.exchanges.spawn(async move {
                    let result = this.exchange(request).await;
                    this.on_interim_answer(handle, result).await;
                });
            }
            Some(TimerAction::Terminate(routing, call_id, cause)) => {
                self.terminate_call(handle, routing, &call_id, cause).await;
            }
        }
    }

    /// Apply the outcome of an interim exchange; releases the exchange reference
    async fn on_interim_answer(&self, handle: SessionHandle, result: ChargingResult<CreditControlAnswer>) {
        let now = self.clock.now();
        let buffer = self.charging.timer_buffer_secs;
        let grant = result.and_then(|answer| answer.grant().map_err(ChargingError::from));

        let terminate = self.registry.with_session(handle, |s| {
            s.exchange_in_flight = false;
            if s.is_terminated() || s.ccr_sent {
                debug!(session_id = %s.session_id, "Discarding answer for a finished session");
                s.release(1);
                return None;
            }

            match &grant {
                Ok(grant) => {
                    self.stats.record_outcome(CcRequestType::Update, true);
                    let window = billing::interim_window(grant.granted_secs, grant.validity_secs);
                    let is_final = grant.is_final_allocation();
                    s.reserved_secs = window;
                    s.valid_for = grant.validity_secs;
                    s.is_final_allocation = is_final;
                    s.redirect_uri = grant.redirect.as_ref().map(|r| r.uri.clone());
                    s.pending_usage_secs = 0;
                    s.state = if is_final {
                        SessionState::NoMoreCredit
                    } else {
                        SessionState::Answered
                    };

                    let delay = billing::timer_delay(window, buffer, is_final);
                    if let Err(e) = s.arm(delay) {
                        error!(session_id = %s.session_id, "Cannot rearm session timer: {}", e);
                    }
                    s.mark_dirty(DirtyState::Changed);
                    self.persist(s);
                    debug!(session_id = %s.session_id, window, delay, is_final, "Interim grant applied");
                    s.release(1);
                    None
                }
                Err(e) => {
                    self.stats.record_outcome(CcRequestType::Update, false);
                    s.state = match e {
                        ChargingError::ReservationDenied { .. } | ChargingError::NonPositiveGrant(_) => {
                            SessionState::NoMoreCredit
                        }
                        _ => SessionState::UnknownError,
                    };
                    s.last_event_timestamp = s.last_event_timestamp_backup;
                    s.billed_secs -= s.pending_usage_secs;
                    s.pending_usage_secs = 0;

                    let remaining = s.reserved_secs - billing::rounded_secs(s.last_event_timestamp, now);
                    warn!(
                        session_id = %s.session_id,
                        state = %s.state,
                        remaining,
                        "Interim request failed: {}", e
                    );
                    s.mark_dirty(DirtyState::Changed);
                    self.persist(s);

                    if remaining > 0 {
                        if let Err(e) = s.arm(remaining) {
                            error!(session_id = %s.session_id, "Cannot arm kill timer: {}", e);
                        }
                        s.release(1);
                        None
                    } else {
                        let cause = if s.state == SessionState::NoMoreCredit {
                            TerminationCause::CreditExhausted
                        } else {
                            TerminationCause::ChargingFailure
                        };
                        Some((s.routing, s.call_id.clone(), cause))
                    }
                }
            }
        });

        if let Some(Some((routing, call_id, cause))) = terminate {
            self.terminate_call(handle, routing, &call_id, cause).await;
        }
    }

    /// Ask the call layer to drop the call, then finalize; consumes one held reference
    async fn terminate_call(&self, handle: SessionHandle, routing: RoutingKeys, call_id: &str, cause: TerminationCause) {
        info!(call_id, cause = %cause, "Terminating call");
        if let Err(e) = self.calls.terminate_call(routing, call_id, &cause).await {
            error!(call_id, "Call control failed to terminate call: {}", e);
        }
        self.finalize(handle, cause);
        self.registry.unref(handle, 1);
    }

    /// Send STOP for the session unless it was already sent
    pub fn finalize(&self, handle: SessionHandle, cause: TerminationCause) -> StopOutcome {
        let now = self.clock.now();
        let prepared = self
            .registry
            .with_session(handle, |s| self.finalize_locked(s, now, &cause));

        match prepared {
            None => StopOutcome::Unknown,
            Some(None) => StopOutcome::AlreadyStopped,
            Some(Some((request, timer))) => {
                self.send_stop(request);
                StopOutcome::Stopped { timer }
            }
        }
    }

    fn finalize_locked(
        &self,
        s: &mut SessionMut<'_>,
        now: DateTime<Utc>,
        cause: &TerminationCause,
    ) -> Option<(CreditControlRequest, TimerDisposition)> {
        if s.ccr_sent {
            debug!(session_id = %s.session_id, "STOP already sent");
            return None;
        }

        let was_active = s.is_active();
        let timer = if was_active {
            let outcome = TimerDisposition::from(s.disarm());
            if outcome == TimerDisposition::Inconsistent {
                error!(session_id = %s.session_id, "Session timer in inconsistent state");
            }
            outcome
        } else {
            TimerDisposition::NotActive
        };

        let actual = s
            .start_time
            .map(|start| billing::ceil_secs(start, now))
            .unwrap_or(0);
        let used = if s.state == SessionState::Pending {
            0
        } else {
            billing::rounded_secs(s.last_event_timestamp, now)
        };
        let used = billing::reconcile_usage(s.billed_secs, used, actual);
        s.billed_secs += used;
        s.last_event_timestamp = now;
        s.hop_by_hop += 1;

        let request = self.composer.stop(s, now, used, cause);
        s.ccr_sent = true;
        s.advance_active(ActiveState::Terminated);
        s.mark_dirty(DirtyState::Deleted);
        self.persist(s);

        if was_active {
            self.stats.session_ended();
        }
        self.stats.record_billed(s.billed_secs);
        info!(
            session_id = %s.session_id,
            used,
            billed = s.billed_secs,
            actual,
            cause = %cause,
            "Session finalized"
        );
        s.release_registration();
        Some((request, timer))
    }

    fn send_stop(&self, request: CreditControlRequest) {
        let exchange = StopExchange {
            request,
            peer: Arc::clone(&self.peer),
            stats: Arc::clone(&self.stats),
            forced_peer: self.diameter.forced_peer.clone(),
            charging: self.charging.clone(),
            shutdown: self.shutdown.clone(),
        };
        self.exchanges.spawn(exchange.run());
    }

    /// Administrative STOP for a live session
    #[instrument(skip(self))]
    pub fn explicit_stop(&self, call: &CallRef, code: u32, reason: &str) -> StopOutcome {
        let Some(guard) = self
            .registry
            .lookup(call.dialog_entry, &call.call_id, call.direction)
        else {
            warn!(call_id = %call.call_id, "No charging session to stop");
            return StopOutcome::Unknown;
        };
        self.finalize(
            guard.handle(),
            TerminationCause::Administrative {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn read_session_id(&self, call: &CallRef) -> Option<String> {
        let guard = self
            .registry
            .lookup(call.dialog_entry, &call.call_id, call.direction)?;
        guard.with(|s| s.session_id.clone())
    }

    /// Re-arm a session restored from the store
    pub fn resume_restored(&self, handle: SessionHandle) -> Option<i64> {
        let now = self.clock.now();
        let buffer = self.charging.timer_buffer_secs;
        self.registry
            .with_session(handle, |s| {
                if !s.is_active() {
                    return None;
                }
                let remaining = s.reserved_secs - billing::rounded_secs(s.last_event_timestamp, now);
                let delay = match s.state {
                    SessionState::Answered => {
                        billing::timer_delay(remaining, buffer, s.is_final_allocation)
                    }
                    _ => remaining.max(0),
                };
                match s.arm(delay) {
                    Ok(_) => {
                        self.stats.session_started();
                        Some(delay)
                    }
                    Err(e) => {
                        error!(session_id = %s.session_id, "Cannot arm restored session: {}", e);
                        None
                    }
                }
            })
            .flatten()
    }

    /// Timers pending in the wheel
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

/// STOP exchange running detached from the session
struct StopExchange<P> {
    request: CreditControlRequest,
    peer: Arc<P>,
    stats: Arc<ChargingStats>,
    forced_peer: Option<String>,
    charging: ChargingConfig,
    shutdown: CancellationToken,
}

impl<P: CreditControlPeer> StopExchange<P> {
    async fn run(self) {
        let session_id = self.request.session_id.clone();
        let message = self.request.to_message();
        self.stats.record_sent(CcRequestType::Termination);

        let started = Instant::now();
        // STOP is still delivered during shutdown, bounded by the timeout
        let sent = tokio::time::timeout(
            self.charging.transaction_timeout(),
            self.peer.send(message, self.forced_peer.as_deref()),
        )
        .await
        .unwrap_or(Err(PeerError::Timeout(self.charging.transaction_timeout_ms)));

        let ok = match sent {
            Ok(answer) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                record_answer_time(
                    &self.stats,
                    &self.charging,
                    &session_id,
                    CcRequestType::Termination,
                    elapsed_ms,
                );
                match CreditControlAnswer::from_message(&answer) {
                    Ok(answer) if answer.result_code == ResultCode::Success.as_u32() => true,
                    Ok(answer) => {
                        warn!(session_id = %session_id, result_code = answer.result_code, "STOP not accepted");
                        false
                    }
                    Err(e) => {
                        error!(session_id = %session_id, "Malformed STOP answer: {}", e);
                        false
                    }
                }
            }
            Err(e) => {
                if matches!(e, PeerError::Timeout(_)) {
                    self.stats.record_timeout();
                }
                error!(
                    session_id = %session_id,
                    cancelled = self.shutdown.is_cancelled(),
                    "STOP exchange failed: {}", e
                );
                false
            }
        };
        self.stats.record_outcome(CcRequestType::Termination, ok);
    }
}

/// Count an answer and report it when it was slower than the configured threshold
fn record_answer_time(
    stats: &ChargingStats,
    charging: &ChargingConfig,
    session_id: &str,
    kind: CcRequestType,
    elapsed_ms: u64,
) {
    stats.record_reply(elapsed_ms);
    if !charging.is_slow_answer(elapsed_ms) {
        return;
    }
    stats.record_slow_answer();
    let threshold_ms = charging.slow_answer_threshold_ms;
    match charging.slow_answer_log_level {
        LatencyLogLevel::Error => {
            error!(session_id, request_type = ?kind, elapsed_ms, threshold_ms, "Slow credit-control answer")
        }
        LatencyLogLevel::Warn => {
            warn!(session_id, request_type = ?kind, elapsed_ms, threshold_ms, "Slow credit-control answer")
        }
        LatencyLogLevel::Info => {
            info!(session_id, request_type = ?kind, elapsed_ms, threshold_ms, "Slow credit-control answer")
        }
        LatencyLogLevel::Debug => {
            debug!(session_id, request_type = ?kind, elapsed_ms, threshold_ms, "Slow credit-control answer")
        }
    }
}

fn grant_of(session: &ChargingSession) -> CreditGrant {
    CreditGrant {
        granted_secs: session.reserved_secs,
        validity_secs: session.valid_for,
        final_unit_action: session
            .is_final_allocation
            .then_some(FinalUnitAction::Terminate),
        redirect: session
            .redirect_uri
            .clone()
            .map(|uri| RedirectTarget { uri }),
        result_code: ResultCode::Success.as_u32(),
    }
}
