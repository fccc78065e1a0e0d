//! Per-request upload parameters and the identity derived from them.

use serde::Serialize;
use std::{collections::HashMap, fmt, str::FromStr};
use thiserror::Error;

/// Separator between an upload identity and the chunk index in chunk keys.
pub const CHUNK_SUFFIX: &str = "_part_";

/// Validation failures for an incoming parameter bag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("missing parameter `{0}`")]
    Missing(&'static str),
    #[error("parameter `{name}` is not a valid number: `{value}`")]
    NotANumber { name: &'static str, value: String },
    #[error("unique identifier must not be empty")]
    EmptyIdentifier,
    #[error("invalid filename `{0}`")]
    InvalidFilename(String),
    #[error("total chunks must be at least 1")]
    NoChunks,
    #[error("chunk number {number} outside 1..={total}")]
    ChunkOutOfRange { number: u32, total: u32 },
}

/// The parameter bag sent with every chunk request.
///
/// Field names follow resumable.js (`resumableChunkNumber`, ...); the plain
/// snake_case names are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadParams {
    pub unique_identifier: String,
    pub filename: String,
    /// 1-based index of the chunk carried by this request.
    pub chunk_number: u32,
    /// Fixed for the lifetime of the upload.
    pub total_chunks: u32,
    /// Informational only, never used for completion.
    pub chunk_size: Option<u64>,
    /// Informational only, never used for completion.
    pub total_size: Option<u64>,
}

impl UploadParams {
    /// Build and validate parameters from decoded form or query pairs.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ParamsError> {
        let unique_identifier = required(
            map,
            "unique_identifier",
            &["unique_identifier", "resumableIdentifier"],
        )?;
        let filename = required(map, "filename", &["filename", "resumableFilename"])?;
        let chunk_number = parse_number(
            "chunk_number",
            &required(map, "chunk_number", &["chunk_number", "resumableChunkNumber"])?,
        )?;
        let total_chunks = parse_number(
            "total_chunks",
            &required(map, "total_chunks", &["total_chunks", "resumableTotalChunks"])?,
        )?;
        let chunk_size = optional(map, &["chunk_size", "resumableChunkSize"])
            .map(|v| parse_number("chunk_size", &v))
            .transpose()?;
        let total_size = optional(map, &["total_size", "resumableTotalSize"])
            .map(|v| parse_number("total_size", &v))
            .transpose()?;

        let params = Self {
            unique_identifier,
            filename,
            chunk_number,
            total_chunks,
            chunk_size,
            total_size,
        };
        params.validate()?;
        Ok(params)
    }

    /// Enforce the invariants the coordinator relies on.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.unique_identifier.trim().is_empty() {
            return Err(ParamsError::EmptyIdentifier);
        }
        if self.filename.is_empty()
            || self.filename.contains('/')
            || self.filename.contains('\\')
            || self.filename == "."
            || self.filename == ".."
            || self.filename.chars().any(char::is_control)
        {
            return Err(ParamsError::InvalidFilename(self.filename.clone()));
        }
        if self.total_chunks == 0 {
            return Err(ParamsError::NoChunks);
        }
        if self.chunk_number == 0 || self.chunk_number > self.total_chunks {
            return Err(ParamsError::ChunkOutOfRange {
                number: self.chunk_number,
                total: self.total_chunks,
            });
        }
        Ok(())
    }
}

fn optional(map: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| map.get(*name))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(
    map: &HashMap<String, String>,
    canonical: &'static str,
    names: &[&str],
) -> Result<String, ParamsError> {
    optional(map, names).ok_or(ParamsError::Missing(canonical))
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ParamsError> {
    value.parse::<T>().map_err(|_| ParamsError::NotANumber {
        name,
        value: value.to_string(),
    })
}

/// Deterministic key of one logical upload across retries.
///
/// MD5 over the user, the destination field, the client identifier, the
/// declared chunk count and the filename. Hex output keeps it safe as a
/// storage key on any backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UploadIdentity(String);

impl UploadIdentity {
    pub fn derive(user: &str, field: &str, params: &UploadParams) -> Self {
        let total = params.total_chunks.to_string();
        let mut ctx = md5::Context::new();
        for part in [
            user,
            field,
            params.unique_identifier.as_str(),
            total.as_str(),
            params.filename.as_str(),
        ] {
            ctx.consume(part.as_bytes());
            // unit separator keeps ("ab", "c") distinct from ("a", "bc")
            ctx.consume(b"\x1f");
        }
        Self(format!("{:x}", ctx.compute()))
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every chunk key of this upload.
    pub fn chunk_prefix(&self) -> String {
        format!("{}{}", self.0, CHUNK_SUFFIX)
    }

    /// Storage key of chunk `number`.
    pub fn chunk_key(&self, number: u32) -> String {
        format!("{}{:04}", self.chunk_prefix(), number)
    }

    /// Recover the chunk index from a key listed under this identity.
    pub fn parse_chunk_index(&self, key: &str) -> Option<u32> {
        let rest = key.strip_prefix(self.0.as_str())?.strip_prefix(CHUNK_SUFFIX)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for UploadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
