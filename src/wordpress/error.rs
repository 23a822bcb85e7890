use std::path::PathBuf;

use thiserror::Error;

/// Errors from the WordPress REST client.
#[derive(Debug, Error)]
pub enum WordPressError {
    #[error("WordPress authentication at {url} failed (HTTP {status}): {body}")]
    Auth {
        url: String,
        status: u16,
        body: String,
    },

    #[error("WordPress token response from {url} has no access_token: {body}")]
    MissingToken { url: String, body: String },

    #[error("WordPress request {method} {url} failed (HTTP {status}): {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("WordPress rejected {method} {url} (HTTP 401) even after re-authenticating")]
    Unauthorized { method: String, url: String },

    #[error("Cannot decode WordPress response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("No WordPress user matches '{0}'")]
    AuthorNotFound(String),

    #[error("Cannot read media file {path}: {source}")]
    MediaFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
