//! WordPress.com REST client.
//!
//! Authenticates with the OAuth2 password grant and carries the bearer token
//! on every site request. A 401 answer triggers exactly one
//! re-authentication and one resend; a second 401 is fatal.

pub mod error;
pub mod types;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::types::TermKind;
use types::{Created, Term, TokenResponse, User, WpErrorBody};

pub use self::error::WordPressError;
pub use self::types::{Endpoints, MediaDetails, NewPost, WordPressCredentials};

/// Initial send plus the one resend after re-authenticating.
const MAX_ATTEMPTS: u32 = 2;

static NUMERIC_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").expect("valid regex")
});

/// Decode the HTML entities WordPress puts in rendered term names.
pub(crate) fn decode_entities(s: &str) -> String {
    let decoded = NUMERIC_ENTITY.replace_all(s, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Prepend a gallery shortcode for `media_ids` to `content`.
fn with_gallery(media_ids: &[u64], content: &str) -> String {
    if media_ids.is_empty() {
        return content.to_string();
    }
    let ids: Vec<String> = media_ids.iter().map(u64::to_string).collect();
    format!("[gallery ids=\"{}\"]\n\n{}", ids.join(","), content)
}

/// Content type for an upload, guessed from the file extension.
fn content_type_for(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// A fully read response.
struct Reply {
    method: Method,
    status: StatusCode,
    url: String,
    body: String,
}

impl Reply {
    async fn read(method: Method, response: Response) -> Result<Self, WordPressError> {
        let status = response.status();
        let url = response.url().to_string();
        let body = response.text().await?;
        Ok(Self {
            method,
            status,
            url,
            body,
        })
    }

    fn json<T: DeserializeOwned>(self) -> Result<T, WordPressError> {
        if !self.status.is_success() {
            return Err(WordPressError::Api {
                method: self.method.to_string(),
                url: self.url,
                status: self.status.as_u16(),
                body: self.body,
            });
        }
        serde_json::from_str(&self.body).map_err(|source| WordPressError::Decode {
            url: self.url,
            source,
        })
    }

    /// Id carried by a `term_exists` rejection, if this is one. This 400 is
    /// the only non-2xx answer treated as success.
    fn existing_term_id(&self) -> Option<u64> {
        if self.status != StatusCode::BAD_REQUEST {
            return None;
        }
        let body: WpErrorBody = serde_json::from_str(&self.body).ok()?;
        if body.code.as_deref() != Some("term_exists") {
            return None;
        }
        body.data.and_then(|d| d.term_id)
    }
}

pub struct WordPressClient {
    http: Client,
    endpoints: Endpoints,
    credentials: WordPressCredentials,
    access_token: Option<SecretString>,
}

impl std::fmt::Debug for WordPressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordPressClient")
            .field("site", &self.credentials.site)
            .field("api_base", &self.endpoints.api_base)
            .field("authenticated", &self.access_token.is_some())
            .finish()
    }
}

impl WordPressClient {
    /// Build a client and authenticate once.
    pub async fn connect(
        http: Client,
        endpoints: Endpoints,
        credentials: WordPressCredentials,
    ) -> Result<Self, WordPressError> {
        let mut client = Self {
            http,
            endpoints,
            credentials,
            access_token: None,
        };
        client.authenticate().await?;
        Ok(client)
    }

    /// Obtain a fresh bearer token via the password grant.
    pub async fn authenticate(&mut self) -> Result<(), WordPressError> {
        let url = self.endpoints.token_url.clone();
        tracing::debug!("POST {}", url);
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
            ("grant_type", "password"),
            ("username", self.credentials.username.as_str()),
            (
                "password",
                self.credentials.application_password.expose_secret(),
            ),
        ];
        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(WordPressError::Auth {
                url,
                status: status.as_u16(),
                body,
            });
        }
        let token = serde_json::from_str::<TokenResponse>(&body)
            .ok()
            .and_then(|t| t.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| WordPressError::MissingToken {
                url: url.clone(),
                body: body.clone(),
            })?;

        self.access_token = Some(SecretString::from(token));
        tracing::info!("Authenticated with WordPress site {}", self.credentials.site);
        Ok(())
    }

    /// Send a request built by `build`, re-authenticating once on 401.
    async fn send_authorized<F>(
        &mut self,
        method: Method,
        url: &str,
        build: F,
    ) -> Result<Reply, WordPressError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        if self.access_token.is_none() {
            self.authenticate().await?;
        }

        for attempt in 1..=MAX_ATTEMPTS {
            let token = self
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
                .unwrap_or_default();
            tracing::debug!(attempt, "{} {}", method, url);
            let request = build(self.http.request(method.clone(), url)).bearer_auth(token);
            let response = request.send().await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Reply::read(method, response).await;
            }
            if attempt < MAX_ATTEMPTS {
                tracing::info!("WordPress token rejected, re-authenticating");
                self.authenticate().await?;
            }
        }

        Err(WordPressError::Unauthorized {
            method: method.to_string(),
            url: url.to_string(),
        })
    }

    /// Resolve `name` to a term id, creating the term when no existing one
    /// has exactly that name (ignoring case).
    pub async fn get_or_create_term(
        &mut self,
        name: &str,
        kind: TermKind,
    ) -> Result<u64, WordPressError> {
        let url = self.endpoints.route(kind.route());
        let terms: Vec<Term> = self
            .send_authorized(Method::GET, &url, |r| {
                r.query(&[("search", name), ("per_page", "100")])
            })
            .await?
            .json()?;

        let wanted = name.to_lowercase();
        if let Some(term) = terms
            .iter()
            .find(|t| decode_entities(&t.name).to_lowercase() == wanted)
        {
            tracing::debug!(id = term.id, "Found WordPress {} '{}'", kind, name);
            return Ok(term.id);
        }

        let body = json!({ "name": name });
        let reply = self
            .send_authorized(Method::POST, &url, |r| r.json(&body))
            .await?;
        if let Some(id) = reply.existing_term_id() {
            tracing::debug!(id, "WordPress {} '{}' already exists", kind, name);
            return Ok(id);
        }
        let created: Created = reply.json()?;
        tracing::info!(id = created.id, "Created WordPress {} '{}'", kind, name);
        Ok(created.id)
    }

    /// First user matching `search`.
    pub async fn find_author(&mut self, search: &str) -> Result<u64, WordPressError> {
        let url = self.endpoints.route("users");
        let users: Vec<User> = self
            .send_authorized(Method::GET, &url, |r| r.query(&[("search", search)]))
            .await?
            .json()?;
        let user = users
            .into_iter()
            .next()
            .ok_or_else(|| WordPressError::AuthorNotFound(search.to_string()))?;
        tracing::debug!(id = user.id, "Resolved author '{}' to {}", search, user.name);
        Ok(user.id)
    }

    /// Upload one file to the media library.
    pub async fn upload_media(
        &mut self,
        path: &Path,
        details: &MediaDetails,
    ) -> Result<u64, WordPressError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| WordPressError::MediaFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();
        let content_type = content_type_for(path);
        let url = self.endpoints.route("media");

        let created: Created = self
            .send_authorized(Method::POST, &url, |r| {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, content_type.clone());
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .headers(headers);
                let form = Form::new()
                    .part("file", part)
                    .text("caption", details.caption.clone())
                    .text("alt_text", details.alt_text.clone())
                    .text("description", details.description.clone());
                r.multipart(form)
            })
            .await?
            .json()?;
        tracing::debug!(id = created.id, "Uploaded {}", path.display());
        Ok(created.id)
    }

    /// Point an uploaded media item at its post.
    pub async fn attach_media(&mut self, media_id: u64, post_id: u64) -> Result<(), WordPressError> {
        let url = self.endpoints.route(&format!("media/{media_id}"));
        let body = json!({ "post": post_id });
        let _: Created = self
            .send_authorized(Method::POST, &url, |r| r.json(&body))
            .await?
            .json()?;
        Ok(())
    }

    /// Upload the post's media, resolve its taxonomy and author, then publish
    /// it backdated to `post.date`. Returns the new post id.
    pub async fn create_post(&mut self, post: &NewPost) -> Result<u64, WordPressError> {
        let total = post.media_paths.len();
        let mut media_ids = Vec::with_capacity(total);
        for (index, path) in post.media_paths.iter().enumerate() {
            let details = MediaDetails {
                caption: format!("{} ({}/{})", post.title, index + 1, total),
                alt_text: post.title.clone(),
                description: format!("Media uploaded for post titled: {}", post.title),
            };
            media_ids.push(self.upload_media(path, &details).await?);
        }

        let mut categories = Vec::with_capacity(post.categories.len());
        for name in &post.categories {
            categories.push(self.get_or_create_term(name, TermKind::Category).await?);
        }
        let mut tags = Vec::with_capacity(post.tags.len());
        for name in &post.tags {
            tags.push(self.get_or_create_term(name, TermKind::Tag).await?);
        }
        let author = match &post.author {
            Some(search) => Some(self.find_author(search).await?),
            None => None,
        };

        let mut body = json!({
            "title": post.title,
            "content": with_gallery(&media_ids, &post.content),
            "status": "publish",
            "format": "standard",
            "comment_status": "open",
            "date_gmt": post.date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "categories": categories,
            "tags": tags,
        });
        if let Some(author) = author {
            body["author"] = json!(author);
        }
        if let Some(first) = media_ids.first() {
            body["featured_media"] = json!(first);
        }

        let url = self.endpoints.route("posts");
        let created: Created = self
            .send_authorized(Method::POST, &url, |r| r.json(&body))
            .await?
            .json()?;

        for media_id in &media_ids {
            self.attach_media(*media_id, created.id).await?;
        }
        tracing::info!(
            post_id = created.id,
            media = media_ids.len(),
            "Published WordPress post '{}'",
            post.title
        );
        Ok(created.id)
    }
}
