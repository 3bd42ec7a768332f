//! Domain models for the charging engine
//!
//! This module contains the core domain models shared by the codec,
//! the services and the persistence layer.

pub mod grant;
pub mod identity;
pub mod session;
pub mod termination;

pub use grant::{CreditGrant, FinalUnitAction, RedirectTarget};
pub use identity::{ChargingVector, MediaKind, PartyIdentities};
pub use session::{
    ActiveState, ChargingSession, Direction, DirtyState, RoutingKeys, SessionParams, SessionState,
};
pub use termination::TerminationCause;
