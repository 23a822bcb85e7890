//! Instagram credential persistence.
//!
//! The credential file is the durable copy of the token state; the in-memory
//! [`Credential`] is a cache of it. Every mutation (token refresh, watermark
//! advance) rewrites the whole file via a temp file + rename, so a crash never
//! leaves a half-written token behind.

pub mod error;

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::fs;

pub use self::error::CredentialError;

/// Long-lived Instagram token plus the migration watermark.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    /// Unix seconds after which the token must be refreshed.
    #[serde(rename = "expiration_date", deserialize_with = "unix_seconds")]
    pub expires_at: i64,
    /// Unix seconds of the newest Instagram post already republished.
    #[serde(
        rename = "last_post_fetch_date",
        default,
        deserialize_with = "unix_seconds"
    )]
    pub last_post_fetch: i64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("last_post_fetch", &self.last_post_fetch)
            .finish()
    }
}

impl Credential {
    /// Whether the token can no longer be used as of `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    /// The watermark as a timestamp, or `None` if nothing was migrated yet.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        if self.last_post_fetch <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.last_post_fetch, 0).single()
    }
}

/// Older credential files store float timestamps; accept both and truncate.
fn unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("timestamp must be a finite number"));
    }
    Ok(value.trunc() as i64)
}

/// Instagram returns `user_id` as a JSON number from the OAuth endpoint but a
/// string from the Graph API.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// File-backed owner of the [`Credential`].
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    credential: Credential,
}

impl TokenStore {
    /// Load the credential file. Missing required keys are a configuration
    /// error surfaced before any network call.
    pub async fn load(path: &Path) -> Result<Self, CredentialError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| CredentialError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let credential: Credential =
            serde_json::from_str(&contents).map_err(|source| CredentialError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            user_id = %credential.user_id,
            expires_at = credential.expires_at,
            "Loaded credentials from {}",
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            credential,
        })
    }

    /// Create the file from a freshly obtained credential, replacing any
    /// previous one.
    pub async fn create(path: &Path, credential: Credential) -> Result<Self, CredentialError> {
        let store = Self {
            path: path.to_path_buf(),
            credential,
        };
        store.persist().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Replace the access token after a refresh and persist.
    pub async fn update_token(
        &mut self,
        access_token: String,
        expires_at: i64,
    ) -> Result<(), CredentialError> {
        self.credential.access_token = access_token;
        self.credential.expires_at = expires_at;
        self.persist().await
    }

    /// Move the watermark forward and persist. Older timestamps are ignored.
    pub async fn advance_watermark(&mut self, timestamp: i64) -> Result<(), CredentialError> {
        if timestamp <= self.credential.last_post_fetch {
            tracing::debug!(
                current = self.credential.last_post_fetch,
                requested = timestamp,
                "Watermark not advanced"
            );
            return Ok(());
        }
        self.credential.last_post_fetch = timestamp;
        self.persist().await
    }

    /// Rewrite the whole file atomically: write a sibling temp file, then rename.
    async fn persist(&self) -> Result<(), CredentialError> {
        let write_err = |source: std::io::Error| CredentialError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(&self.credential)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(write_err)?;
        #[cfg(unix)]
        {
            // The file holds a bearer token; owner-only access.
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp_path, perms)
                .await
                .map_err(write_err)?;
        }
        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;

        tracing::debug!("Saved credentials to {}", self.path.display());
        Ok(())
    }
}
