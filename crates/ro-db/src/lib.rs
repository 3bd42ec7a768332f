//! Ro Charging Database Layer
//!
//! PostgreSQL persistence for live charging sessions. The engine only
//! writes through the `SessionStore` trait and reads everything back once,
//! at startup, to rehydrate the registry.
//!
//! - Connection pool management with sqlx
//! - Embedded migrations for the session table
//! - `PgSessionRepository`, the `SessionStore` implementation

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

pub use ro_core::{ChargingError, ChargingResult};
pub use sqlx::PgPool;
