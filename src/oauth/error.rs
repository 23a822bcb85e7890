use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the local redirect listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("TLS is enabled but SSL_PASSWORD is not set")]
    MissingPassphrase,

    #[error("Failed to load TLS material from {path}: {message}")]
    Tls { path: PathBuf, message: String },

    #[error("Failed to bind OAuth listener on {addr} after {attempts} attempts: {source}")]
    Bind {
        addr: SocketAddr,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("OAuth listener stopped before an authorization code arrived: {0}")]
    Terminated(String),

    #[error("OAuth listener is not running")]
    NotStarted,

    #[error("Interrupted while waiting for the authorization code")]
    Interrupted,
}

/// Failures of the authorization handshake.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Instagram(#[from] crate::instagram::InstagramError),

    #[error(transparent)]
    Credential(#[from] crate::credentials::CredentialError),

    #[error("Invalid authorization URL: {0}")]
    Url(#[from] url::ParseError),
}
