use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;

/// WordPress.com OAuth2 password-grant credentials.
#[derive(Debug, Clone)]
pub struct WordPressCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub application_password: SecretString,
    pub site: String,
}

const PUBLIC_API: &str = "https://public-api.wordpress.com";

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: String,
    /// Root of the site's REST routes, e.g. `.../wp/v2/sites/{site}`.
    pub api_base: String,
}

impl Endpoints {
    pub fn for_site(site: &str) -> Self {
        Self::with_base(PUBLIC_API, site)
    }

    /// Route a whole client at one base URL.
    pub fn with_base(base: &str, site: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            token_url: format!("{base}/oauth2/token"),
            api_base: format!("{base}/wp/v2/sites/{site}"),
        }
    }

    pub(crate) fn route(&self, route: &str) -> String {
        format!("{}/{}", self.api_base, route)
    }
}

/// Everything needed to publish one post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    /// HTML body; the gallery shortcode is prepended by the client.
    pub content: String,
    /// Publication date, sent as `date_gmt`.
    pub date: DateTime<Utc>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    /// Search string resolved through `/users?search=`.
    pub author: Option<String>,
    pub media_paths: Vec<PathBuf>,
}

/// Text metadata attached to an uploaded media item.
#[derive(Debug, Clone, Default)]
pub struct MediaDetails {
    pub caption: String,
    pub alt_text: String,
    pub description: String,
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Term {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Created {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// Body of a 400 `term_exists` answer to a create request.
#[derive(Debug, Deserialize)]
pub(crate) struct WpErrorBody {
    pub code: Option<String>,
    pub data: Option<WpErrorData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WpErrorData {
    pub term_id: Option<u64>,
}
