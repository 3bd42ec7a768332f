//! Collaborator traits
//!
//! The engine does not own the call layer nor the database. It talks to
//! them through these seams so that hosts, simulators and tests can plug
//! their own implementations.

use crate::error::ChargingError;
use crate::models::{ChargingSession, RoutingKeys, TerminationCause};
use async_trait::async_trait;

/// Control over the calls the engine is charging
#[async_trait]
pub trait CallControl: Send + Sync + 'static {
    /// Tear down the dialog identified by `routing`
    ///
    /// The call layer reports the resulting teardown back through the
    /// lifecycle coordinator as usual.
    async fn terminate_call(
        &self,
        routing: RoutingKeys,
        call_id: &str,
        cause: &TerminationCause,
    ) -> Result<(), ChargingError>;
}

/// Persistence target for session snapshots
///
/// Only used to rehydrate the registry after a restart; the live engine
/// never reads back from it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a newly linked session
    async fn insert(&self, session: &ChargingSession) -> Result<(), ChargingError>;

    /// Update the row of an existing session
    async fn update(&self, session: &ChargingSession) -> Result<(), ChargingError>;

    /// Insert or update, used by the shutdown dump
    async fn upsert(&self, session: &ChargingSession) -> Result<(), ChargingError>;

    /// Delete the row of a finalized session
    async fn delete(&self, session: &ChargingSession) -> Result<bool, ChargingError>;

    /// Load every stored session
    async fn load_all(&self) -> Result<Vec<ChargingSession>, ChargingError>;
}
