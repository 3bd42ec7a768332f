//! Ro Charging Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Ro credit-control engine. It includes:
//!
//! - Domain models (ChargingSession, lifecycle states, credit grants)
//! - Collaborator traits for call control and session persistence
//! - Unified error handling following the charging failure taxonomy
//! - Application configuration
//! - Wall-clock abstraction used by timers and billing arithmetic

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::ChargingError;

/// Result type alias using ChargingError
pub type ChargingResult<T> = Result<T, ChargingError>;
