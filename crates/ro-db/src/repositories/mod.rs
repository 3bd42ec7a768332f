//! Repository implementations
//!
//! Concrete implementations of the storage traits defined in ro-core,
//! using sqlx for PostgreSQL access.

pub mod session_repo;

pub use session_repo::PgSessionRepository;
