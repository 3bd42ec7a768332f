//! Session persistence
//!
//! Mutations mark a session dirty; the controller hands dirty sessions to a
//! `PersistenceSink`, which forwards snapshots to a background writer over
//! an unbounded channel. Writes are fire-and-forget: a failed write is
//! logged and never reaches the charging path.

use ro_core::models::{ChargingSession, DirtyState};
use ro_core::traits::SessionStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Work item for the writer task
#[derive(Debug)]
pub enum PersistenceEvent {
    Insert(ChargingSession),
    Update(ChargingSession),
    Delete(ChargingSession),
    /// Periodic snapshot of a live session
    Snapshot(ChargingSession),
    /// Answered once every earlier event has been written
    Flush(oneshot::Sender<()>),
}

/// Sending half handed to the controller
#[derive(Debug, Clone)]
pub struct PersistenceSink {
    tx: mpsc::UnboundedSender<PersistenceEvent>,
}

impl PersistenceSink {
    /// Queue the session's pending change, clearing its dirty state
    pub fn record(&self, session: &mut ChargingSession) {
        let event = match session.take_dirty() {
            DirtyState::Clean => return,
            DirtyState::New => PersistenceEvent::Insert(session.clone()),
            DirtyState::Changed => PersistenceEvent::Update(session.clone()),
            DirtyState::Deleted => PersistenceEvent::Delete(session.clone()),
        };
        if self.tx.send(event).is_err() {
            warn!(session_id = %session.session_id, "Persistence writer is gone, change dropped");
        }
    }

    /// Queue a full snapshot of a live session, leaving its dirty state alone
    pub fn snapshot(&self, session: ChargingSession) -> bool {
        self.tx.send(PersistenceEvent::Snapshot(session)).is_ok()
    }

    /// Wait until everything queued so far is written
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistenceEvent::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }
}

/// Background task applying session changes to a store
pub struct PersistenceWriter {
    store: Arc<dyn SessionStore>,
    rx: mpsc::UnboundedReceiver<PersistenceEvent>,
}

impl PersistenceWriter {
    /// Start the writer; it stops once every sink is dropped
    pub fn spawn(store: Arc<dyn SessionStore>) -> (PersistenceSink, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Self { store, rx };
        let handle = tokio::spawn(writer.run());
        (PersistenceSink { tx }, handle)
    }

    async fn run(mut self) {
        info!("Persistence writer started");
        while let Some(event) = self.rx.recv().await {
            match event {
                PersistenceEvent::Insert(session) => {
                    if let Err(e) = self.store.insert(&session).await {
                        error!(session_id = %session.session_id, "Failed to insert session: {}", e);
                    }
                }
                PersistenceEvent::Update(session) => {
                    if let Err(e) = self.store.update(&session).await {
                        error!(session_id = %session.session_id, "Failed to update session: {}", e);
                    }
                }
                PersistenceEvent::Snapshot(session) => {
                    if let Err(e) = self.store.upsert(&session).await {
                        error!(session_id = %session.session_id, "Failed to snapshot session: {}", e);
                    }
                }
                PersistenceEvent::Delete(session) => match self.store.delete(&session).await {
                    Ok(true) => {}
                    Ok(false) => debug!(session_id = %session.session_id, "No stored row to delete"),
                    Err(e) => {
                        error!(session_id = %session.session_id, "Failed to delete session: {}", e)
                    }
                },
                PersistenceEvent::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        info!("Persistence writer stopped");
    }
}

/// Upsert every given session, returning how many were written
pub async fn dump_sessions(store: &dyn SessionStore, sessions: &[ChargingSession]) -> usize {
    let mut written = 0;
    for session in sessions {
        match store.upsert(session).await {
            Ok(()) => written += 1,
            Err(e) => error!(session_id = %session.session_id, "Failed to dump session: {}", e),
        }
    }
    written
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use ro_core::models::{Direction, PartyIdentities, RoutingKeys, SessionParams};
    use ro_core::ChargingError;

    /// Store keeping rows in memory and logging every call
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub rows: Mutex<Vec<ChargingSession>>,
        pub log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn insert(&self, session: &ChargingSession) -> Result<(), ChargingError> {
            self.log.lock().push(format!("insert {}", session.session_id));
            self.rows.lock().push(session.clone());
            Ok(())
        }

        async fn update(&self, session: &ChargingSession) -> Result<(), ChargingError> {
            self.log.lock().push(format!("update {}", session.session_id));
            let mut rows = self.rows.lock();
            match rows.iter_mut().find(|r| r.session_id == session.session_id) {
                Some(row) => {
                    *row = session.clone();
                    Ok(())
                }
                None => Err(ChargingError::SessionNotFound(session.session_id.clone())),
            }
        }

        async fn upsert(&self, session: &ChargingSession) -> Result<(), ChargingError> {
            self.log.lock().push(format!("upsert {}", session.session_id));
            let mut rows = self.rows.lock();
            rows.retain(|r| r.session_id != session.session_id);
            rows.push(session.clone());
            Ok(())
        }

        async fn delete(&self, session: &ChargingSession) -> Result<bool, ChargingError> {
            self.log.lock().push(format!("delete {}", session.session_id));
            let mut rows = self.rows.lock();
            let before = rows.len();
            rows.retain(|r| r.session_id != session.session_id);
            Ok(rows.len() < before)
        }

        async fn load_all(&self) -> Result<Vec<ChargingSession>, ChargingError> {
            Ok(self.rows.lock().clone())
        }
    }

    fn session(id: &str) -> ChargingSession {
        ChargingSession::new(
            SessionParams {
                session_id: id.to_string(),
                call_id: format!("call-{}", id),
                direction: Direction::Originating,
                identities: PartyIdentities::new("sip:alice@ims.test", "sip:bob@ims.test"),
                charging_vector: None,
                rating_group: 100,
                service_identifier: 1000,
                routing: RoutingKeys::new(1, 1),
                origin_host: "scscf".to_string(),
                auth_app_id: 4,
                auth_session_type: 1,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_writer_applies_changes_in_order() {
        let store = Arc::new(MemoryStore::default());
        let (sink, handle) = PersistenceWriter::spawn(store.clone());

        let mut s = session("s1");
        s.mark_dirty(DirtyState::New);
        sink.record(&mut s);
        sink.record(&mut s);
        s.billed_secs = 30;
        s.mark_dirty(DirtyState::Changed);
        sink.record(&mut s);
        s.mark_dirty(DirtyState::Deleted);
        sink.record(&mut s);

        assert!(sink.flush().await);
        assert_eq!(
            *store.log.lock(),
            vec!["insert s1", "update s1", "delete s1"]
        );
        assert!(store.rows.lock().is_empty());

        drop(sink);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dump_upserts_everything() {
        let store = MemoryStore::default();
        let sessions = vec![session("a"), session("b")];
        assert_eq!(dump_sessions(&store, &sessions).await, 2);
        assert_eq!(dump_sessions(&store, &sessions).await, 2);
        assert_eq!(store.rows.lock().len(), 2);
    }
}
