//! Charging engine services
//!
//! This crate holds the moving parts of the Ro online charging engine:
//! the per-session timer wheel, the bucketed session registry, the
//! reauthorization controller that drives CCR exchanges, and the lifecycle
//! coordinator that turns dialog events into billing decisions.
//!
//! # Architecture
//!
//! - Sessions live in the registry and are addressed by generation-checked
//!   handles; all mutation happens under the owning bucket lock
//! - Network exchanges run as tracked tokio tasks outside every lock
//! - Collaborators (OCS peer, call control, session store) are traits so
//!   that hosts and tests can plug their own
//! - `ChargingEngine` wires everything together and owns the tick loop
//!
//! # Services
//!
//! - `TimerWheel` - deadline-ordered timers keyed by session handle
//! - `SessionRegistry` - reference-counted session storage
//! - `ReauthorizationController` - INITIAL/UPDATE/TERMINATION exchanges
//! - `LifecycleCoordinator` - confirmed/terminated dialog events
//! - `ChargingStats` - counters for monitoring
//! - `PersistenceWriter` - background session snapshot writer

pub mod billing;
pub mod controller;
pub mod engine;
pub mod lifecycle;
pub mod persistence;
pub mod registry;
pub mod requests;
pub mod stats;
pub mod timer;

pub use controller::{
    BillingStart, CallRef, InitialReservationRequest, ReauthorizationController, ReservationOutcome,
    StopOutcome, TimerDisposition,
};
pub use engine::ChargingEngine;
pub use lifecycle::{DialogEvent, EventOutcome, LifecycleCoordinator};
pub use persistence::{PersistenceEvent, PersistenceSink, PersistenceWriter};
pub use registry::{RefGuard, SessionHandle, SessionMut, SessionRegistry};
pub use requests::{RequestComposer, SessionIdGenerator};
pub use stats::{ChargingStats, StatsSnapshot};
pub use timer::{RemoveOutcome, TimerError, TimerWheel};

/// Engine constants
pub mod constants {
    /// Auth-Session-State NO_STATE_MAINTAINED
    pub const AUTH_SESSION_STATE_NO_STATE: u32 = 1;

    /// Request number of the INITIAL request
    pub const INITIAL_REQUEST_NUMBER: u32 = 0;
}
