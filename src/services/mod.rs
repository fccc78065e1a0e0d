//! Upload coordination on top of the storage traits.

pub mod janitor;
pub mod resumable_file;
pub mod upload_service;

use crate::{models::upload::ParamsError, storage::StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    InvalidParams(#[from] ParamsError),
    #[error("unknown upload destination `{0}`")]
    UnknownDestination(String),
    #[error("invalid destination template `{0}`")]
    InvalidTemplate(String),
    #[error("writing {target} failed: {source}")]
    StorageWrite {
        target: String,
        #[source]
        source: StorageError,
    },
    #[error("upload `{identity}` incomplete: {present} of {total} chunks present")]
    Precondition {
        identity: String,
        present: usize,
        total: u32,
    },
    #[error("no chunks for upload `{0}`; already collected or never started")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type UploadResult<T> = Result<T, UploadError>;
