use std::path::PathBuf;

use thiserror::Error;

/// Errors from the Instagram Graph client.
///
/// URLs embedded here always have `access_token` and `client_secret`
/// redacted.
#[derive(Debug, Error)]
pub enum InstagramError {
    #[error("Instagram request {url} failed (HTTP {status}): {body}")]
    Api {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Instagram response from {url} is missing {field}: {body}")]
    MissingField {
        url: String,
        field: &'static str,
        body: String,
    },

    #[error("Cannot decode Instagram response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("Invalid Instagram URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Cannot write media to {path}: {source}")]
    Disk {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Credential(#[from] crate::credentials::CredentialError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl InstagramError {
    /// Transport failure with the request URL stripped, since it carries
    /// the access token.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        InstagramError::Http(e.without_url())
    }
}
