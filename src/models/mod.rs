//! Core data models for the resumable upload service.
//!
//! Upload parameters and identities are derived per request; only the final
//! `StoredFile` is persisted (SQLite via `sqlx::FromRow`).

pub mod destination;
pub mod stored_file;
pub mod upload;
