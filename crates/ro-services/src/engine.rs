//! Charging engine
//!
//! Owns one instance of every moving part and the loop that sweeps the
//! timer wheel. Hosts create it once, call `rehydrate` before taking
//! traffic, spawn `run`, and call `shutdown` on the way out.

use ro_core::config::{AppConfig, DbMode};
use ro_core::traits::{CallControl, SessionStore};
use ro_core::{ChargingResult, Clock};
use ro_diameter::CreditControlPeer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::ReauthorizationController;
use crate::lifecycle::LifecycleCoordinator;
use crate::persistence::{self, PersistenceSink, PersistenceWriter};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::stats::{ChargingStats, StatsSnapshot};
use crate::timer::TimerWheel;

pub struct ChargingEngine<P: CreditControlPeer, C: CallControl> {
    config: AppConfig,
    registry: Arc<SessionRegistry>,
    timers: Arc<TimerWheel<SessionHandle>>,
    controller: Arc<ReauthorizationController<P, C>>,
    coordinator: LifecycleCoordinator<P, C>,
    stats: Arc<ChargingStats>,
    store: Option<Arc<dyn SessionStore>>,
    sink: Option<PersistenceSink>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<P: CreditControlPeer, C: CallControl> ChargingEngine<P, C> {
    /// Build the engine; must be called inside a tokio runtime when the
    /// database mode is `realtime`, since the writer task starts here
    pub fn new(
        config: AppConfig,
        peer: Arc<P>,
        calls: Arc<C>,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let charging = &config.charging;
        let timers = Arc::new(TimerWheel::new(Arc::clone(&clock)));
        let registry = Arc::new(SessionRegistry::new(
            charging.bucket_count() as usize,
            charging.lock_count() as usize,
            charging.max_sessions,
            Arc::clone(&timers),
        ));
        let stats = Arc::new(ChargingStats::new());
        let shutdown = CancellationToken::new();

        let (sink, writer) = match (&store, config.database.mode) {
            (Some(store), DbMode::Realtime) => {
                let (sink, handle) = PersistenceWriter::spawn(Arc::clone(store));
                (Some(sink), Some(handle))
            }
            (None, DbMode::Realtime | DbMode::Shutdown) => {
                warn!(mode = ?config.database.mode, "No session store configured, persistence disabled");
                (None, None)
            }
            _ => (None, None),
        };

        let controller = Arc::new(ReauthorizationController::new(
            Arc::clone(&registry),
            peer,
            calls,
            clock,
            config.charging.clone(),
            config.diameter.clone(),
            Arc::clone(&stats),
            sink.clone(),
            shutdown.clone(),
        ));
        let coordinator = LifecycleCoordinator::new(Arc::clone(&controller));

        info!(
            buckets = config.charging.bucket_count(),
            locks = config.charging.lock_count(),
            db_mode = ?config.database.mode,
            "Charging engine created"
        );

        Self {
            config,
            registry,
            timers,
            controller,
            coordinator,
            stats,
            store,
            sink,
            writer: parking_lot::Mutex::new(writer),
            shutdown,
        }
    }

    pub fn controller(&self) -> &Arc<ReauthorizationController<P, C>> {
        &self.controller
    }

    pub fn coordinator(&self) -> &LifecycleCoordinator<P, C> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Fire every due timer once; returns how many fired
    pub async fn tick_once(&self) -> usize {
        let due = self.timers.sweep_due();
        let fired = due.len();
        for handle in due {
            self.controller.on_timer_expired(handle).await;
        }
        if fired > 0 {
            debug!(fired, pending = self.timers.len(), "Timer sweep");
        }
        fired
    }

    /// Queue a snapshot of every live session that has not sent STOP
    pub fn write_snapshots(&self) -> usize {
        let Some(sink) = &self.sink else {
            return 0;
        };
        let mut queued = 0;
        for (_, session) in self.registry.snapshot_all() {
            if session.ccr_sent || session.is_terminated() {
                continue;
            }
            if !sink.snapshot(session) {
                warn!("Persistence writer is gone, snapshots skipped");
                break;
            }
            queued += 1;
        }
        debug!(queued, "Session snapshots queued");
        queued
    }

    /// Sweep the wheel every tick until shutdown, snapshotting live
    /// sessions on the configured period
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.charging.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let snapshot_period = self.config.database.snapshot_period().filter(|_| self.sink.is_some());
        let mut snapshots = snapshot_period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        info!(
            interval_ms = self.config.charging.tick_interval_ms,
            snapshot_period_secs = snapshot_period.map(|p| p.as_secs()),
            "Timer loop started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = next_tick(&mut snapshots) => {
                    self.write_snapshots();
                }
            }
        }
        info!("Timer loop stopped");
    }

    /// Reload sessions persisted by an earlier run; returns how many were restored
    pub async fn rehydrate(&self) -> ChargingResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        if self.config.database.mode == DbMode::None {
            return Ok(0);
        }

        let sessions = store.load_all().await?;
        let total = sessions.len();
        let mut restored = 0;
        for session in sessions {
            if session.is_terminated() || session.ccr_sent {
                debug!(session_id = %session.session_id, "Skipping finished session");
                continue;
            }
            let session_id = session.session_id.clone();
            match self.registry.restore(session) {
                Ok(handle) => {
                    if let Some(delay) = self.controller.resume_restored(handle) {
                        debug!(session_id = %session_id, delay, "Session timer restored");
                    }
                    restored += 1;
                }
                Err(e) => error!(session_id = %session_id, "Cannot restore session: {}", e),
            }
        }
        info!(restored, total, "Sessions rehydrated");
        Ok(restored)
    }

    /// Stop the timer loop, drain exchanges and persist what is left
    pub async fn shutdown(&self) {
        info!("Shutting down charging engine");
        self.shutdown.cancel();
        self.controller.settle().await;

        if self.config.database.mode == DbMode::Shutdown {
            if let Some(store) = &self.store {
                let sessions: Vec<_> = self
                    .registry
                    .snapshot_all()
                    .into_iter()
                    .map(|(_, session)| session)
                    .filter(|session| !session.ccr_sent)
                    .collect();
                let written = persistence::dump_sessions(store.as_ref(), &sessions).await;
                info!(written, total = sessions.len(), "Session dump complete");
            }
        }

        if let Some(sink) = &self.sink {
            if !sink.flush().await {
                warn!("Persistence writer stopped before flush");
            }
        }
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.abort();
        }

        let stats = self.stats.snapshot();
        info!(
            live_sessions = self.registry.len(),
            billed_secs = stats.billed_secs,
            timeouts = stats.ccr_timeouts,
            "Charging engine stopped"
        );
    }
}

/// Next tick of an optional interval; never completes when there is none
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ro_core::models::{
        ActiveState, ChargingSession, Direction, PartyIdentities, RoutingKeys, SessionParams,
        SessionState, TerminationCause,
    };
    use ro_core::{ChargingError, ManualClock};
    use ro_diameter::{DiameterMessage, PeerError};

    use crate::persistence::tests::MemoryStore;

    struct SilentPeer;

    #[async_trait]
    impl CreditControlPeer for SilentPeer {
        async fn send(
            &self,
            _request: DiameterMessage,
            _destination: Option<&str>,
        ) -> Result<DiameterMessage, PeerError> {
            Err(PeerError::Transport("unreachable".to_string()))
        }
    }

    struct NoCalls;

    #[async_trait]
    impl CallControl for NoCalls {
        async fn terminate_call(
            &self,
            _routing: RoutingKeys,
            _call_id: &str,
            _cause: &TerminationCause,
        ) -> Result<(), ChargingError> {
            Ok(())
        }
    }

    fn stored(id: &str, active: ActiveState, clock: &ManualClock) -> ChargingSession {
        let mut session = ChargingSession::new(
            SessionParams {
                session_id: id.to_string(),
                call_id: format!("call-{}", id),
                direction: Direction::Originating,
                identities: PartyIdentities::new("sip:alice@ims.test", "sip:bob@ims.test"),
                charging_vector: None,
                rating_group: 100,
                service_identifier: 1000,
                routing: RoutingKeys::new(7, 1),
                origin_host: "scscf".to_string(),
                auth_app_id: 4,
                auth_session_type: 1,
            },
            clock.now(),
        );
        session.active = active;
        session.state = SessionState::Answered;
        session.reserved_secs = 30;
        session.start_time = Some(clock.now());
        session
    }

    fn engine(mode: DbMode, store: Arc<MemoryStore>) -> (Arc<ManualClock>, ChargingEngine<SilentPeer, NoCalls>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let mut config = AppConfig::default();
        config.database.mode = mode;
        let store: Arc<dyn SessionStore> = store;
        let engine = ChargingEngine::new(
            config,
            Arc::new(SilentPeer),
            Arc::new(NoCalls),
            clock.clone(),
            Some(store),
        );
        (clock, engine)
    }

    #[tokio::test]
    async fn test_rehydrate_restores_live_sessions() {
        let store = Arc::new(MemoryStore::default());
        let (clock, engine) = engine(DbMode::Realtime, store.clone());
        store.rows.lock().push(stored("live", ActiveState::Active, &clock));
        store.rows.lock().push(stored("done", ActiveState::Terminated, &clock));

        clock.advance_secs(10);
        let restored = tokio_test::assert_ok!(engine.rehydrate().await);
        assert_eq!(restored, 1);
        assert_eq!(engine.registry().len(), 1);
        // 30s grant, 10s already used, 5s buffer
        let (_, deadline) = engine.timers.pending()[0];
        assert_eq!(deadline, clock.now() + chrono::Duration::seconds(15));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_dumps_sessions() {
        let store = Arc::new(MemoryStore::default());
        let (clock, engine) = engine(DbMode::Shutdown, store.clone());
        engine
            .registry()
            .restore(stored("s1", ActiveState::NotYetActive, &clock))
            .unwrap();

        engine.shutdown().await;
        assert_eq!(*store.log.lock(), vec!["upsert s1"]);
        assert!(engine.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_tick_fires_due_timers() {
        let store = Arc::new(MemoryStore::default());
        let (clock, engine) = engine(DbMode::None, store);
        let handle = engine
            .registry()
            .restore(stored("s1", ActiveState::Active, &clock))
            .unwrap();
        assert_eq!(engine.controller().resume_restored(handle), Some(25));

        assert_eq!(engine.tick_once().await, 0);
        clock.advance_secs(25);
        assert_eq!(engine.tick_once().await, 1);
        engine.controller().settle().await;
        // The peer is down: usage is rolled back and a kill timer covers the rest of the grant
        assert_eq!(engine.timers.len(), 1);
        assert_eq!(engine.stats().interim_failed, 1);
    }

    #[tokio::test]
    async fn test_snapshots_cover_live_sessions_only() {
        let store = Arc::new(MemoryStore::default());
        let (clock, engine) = engine(DbMode::Realtime, store.clone());
        engine
            .registry()
            .restore(stored("live", ActiveState::Active, &clock))
            .unwrap();
        let mut stopped = stored("stopped", ActiveState::Active, &clock);
        stopped.ccr_sent = true;
        engine.registry().restore(stopped).unwrap();

        assert_eq!(engine.write_snapshots(), 1);
        engine.shutdown().await;
        assert_eq!(*store.log.lock(), vec!["upsert live"]);
    }

    #[tokio::test]
    async fn test_no_snapshots_without_writer() {
        let store = Arc::new(MemoryStore::default());
        let (clock, engine) = engine(DbMode::Shutdown, store.clone());
        engine
            .registry()
            .restore(stored("s1", ActiveState::Active, &clock))
            .unwrap();
        assert_eq!(engine.write_snapshots(), 0);
    }
}
