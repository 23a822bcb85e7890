//! Error types for the credential store.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    /// The credential file could not be read.
    #[error("Failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The credential file is not valid JSON or lacks required keys.
    #[error(
        "Credential file {path} is invalid ({source}); expected keys: access_token, user_id, expiration_date"
    )]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The credential file could not be written.
    #[error("Failed to write credential file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
