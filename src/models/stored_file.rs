//! Represents a fully assembled file held in persistent storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A collected upload, written once and never modified afterwards.
///
/// The struct stores metadata only; the payload lives on the persistent
/// backend under `name`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredFile {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Collision-free, slash-separated name within persistent storage.
    pub name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the assembled payload.
    pub etag: String,

    /// When the collection finished.
    pub created_at: DateTime<Utc>,
}
