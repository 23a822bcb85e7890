//! Instagram Graph API client.
//!
//! Every metadata request goes through [`InstagramClient::get_json`], which
//! first calls [`InstagramClient::refresh_if_needed`] and then stamps the
//! current access token onto the URL, so a request is never sent with a
//! token the client already knows to be expired. Pagination follows the
//! opaque `paging.next` URLs Instagram hands back.

pub mod endpoints;
pub mod error;
pub(crate) mod responses;
pub mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::credentials::{Credential, TokenStore};
use responses::{Page, TokenGrant};

pub use self::endpoints::Endpoints;
pub use self::error::InstagramError;
pub use self::types::{MediaItem, MediaType, UserProfile};

const CHILD_FIELDS: &str = "id,media_type,permalink,media_url,thumbnail_url,username,timestamp";
const MEDIA_FIELDS: &str =
    "id,media_type,permalink,media_url,thumbnail_url,username,timestamp,caption";
const USER_FIELDS: &str = "id,account_type,username,media_count";

/// Query parameters never echoed into logs or errors.
const SECRET_PARAMS: &[&str] = &["access_token", "client_secret"];

/// Render `url` with secret query values replaced.
pub(crate) fn redact_url(url: &Url) -> String {
    if !url
        .query_pairs()
        .any(|(k, _)| SECRET_PARAMS.contains(&&*k))
    {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_PARAMS.contains(&&*k) {
                "REDACTED".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, InstagramError> {
    Url::parse(raw).map_err(|source| InstagramError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Send `request` and return the body of a 2xx response. Any other status is
/// an `Api` error carrying `shown_url` and the raw body.
pub(crate) async fn send_for_text(
    request: RequestBuilder,
    shown_url: &str,
) -> Result<String, InstagramError> {
    let response = request.send().await.map_err(InstagramError::transport)?;
    let status = response.status();
    let body = response.text().await.map_err(InstagramError::transport)?;
    if !status.is_success() {
        return Err(InstagramError::Api {
            url: shown_url.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

pub(crate) fn decode<T: DeserializeOwned>(shown_url: &str, body: &str) -> Result<T, InstagramError> {
    serde_json::from_str(body).map_err(|source| InstagramError::Decode {
        url: shown_url.to_string(),
        source,
    })
}

/// Unpack a long-lived token response; both fields are required.
pub(crate) fn require_grant(
    grant: TokenGrant,
    shown_url: &str,
    body: &str,
) -> Result<(String, i64), InstagramError> {
    let missing = |field| InstagramError::MissingField {
        url: shown_url.to_string(),
        field,
        body: body.to_string(),
    };
    let token = grant.access_token.ok_or_else(|| missing("access_token"))?;
    let expires_in = grant.expires_in.ok_or_else(|| missing("expires_in"))?;
    Ok((token, expires_in))
}

/// Filters for [`InstagramClient::list_media`].
#[derive(Debug, Default, Clone)]
pub struct MediaQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub include_children: bool,
    pub excluded_ids: HashSet<String>,
}

#[derive(Debug)]
pub struct InstagramClient {
    http: Client,
    endpoints: Endpoints,
    store: TokenStore,
}

impl InstagramClient {
    /// Wrap a loaded token store, refreshing the token if it has expired.
    pub async fn connect(
        http: Client,
        endpoints: Endpoints,
        store: TokenStore,
    ) -> Result<Self, InstagramError> {
        let mut client = Self {
            http,
            endpoints,
            store,
        };
        client.refresh_if_needed().await?;
        Ok(client)
    }

    pub fn credential(&self) -> &Credential {
        self.store.credential()
    }

    /// Persist `timestamp` as the newest migrated post (forward-only).
    pub async fn advance_watermark(&mut self, timestamp: DateTime<Utc>) -> Result<(), InstagramError> {
        self.store.advance_watermark(timestamp.timestamp()).await?;
        Ok(())
    }

    /// Exchange the held token for a fresh one when it has expired.
    ///
    /// Returns `true` if a refresh happened. Makes no network call while the
    /// token is still valid.
    pub async fn refresh_if_needed(&mut self) -> Result<bool, InstagramError> {
        let now = Utc::now().timestamp();
        if !self.store.credential().is_expired_at(now) {
            return Ok(false);
        }
        tracing::info!(
            expired_at = self.store.credential().expires_at,
            "Instagram access token expired, refreshing"
        );

        let mut url = parse_url(&self.endpoints.refresh_token())?;
        url.query_pairs_mut()
            .append_pair("grant_type", "ig_refresh_token")
            .append_pair("access_token", &self.store.credential().access_token);
        let shown = redact_url(&url);
        tracing::debug!("GET {}", shown);

        let body = send_for_text(self.http.get(url), &shown).await?;
        let grant: TokenGrant = decode(&shown, &body)?;
        let (token, expires_in) = require_grant(grant, &shown, &body)?;

        self.store.update_token(token, now + expires_in).await?;
        if let Some(expiry) = self.store.credential().expiry() {
            tracing::info!(
                "Instagram access token refreshed, valid until {} (saved to {})",
                expiry,
                self.store.path().display()
            );
        }
        Ok(true)
    }

    /// Put the current access token on `url`, replacing any older one that a
    /// `paging.next` link may carry.
    fn with_current_token(&self, mut url: Url) -> Url {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "access_token")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair("access_token", &self.store.credential().access_token);
        url
    }

    async fn get_json<T: DeserializeOwned>(&mut self, url: Url) -> Result<T, InstagramError> {
        self.refresh_if_needed().await?;
        let url = self.with_current_token(url);
        let shown = redact_url(&url);
        tracing::debug!("GET {}", shown);
        let body = send_for_text(self.http.get(url), &shown).await?;
        decode(&shown, &body)
    }

    fn graph_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, InstagramError> {
        let mut url = parse_url(&self.endpoints.graph(path))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    /// Follow `paging.next` from `first` until it is absent or a page comes
    /// back without `data`.
    async fn collect_pages(&mut self, first: Url) -> Result<Vec<MediaItem>, InstagramError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0u32;

        while let Some(url) = next.take() {
            let current = url.to_string();
            let page: Page<MediaItem> = self.get_json(url).await?;
            pages += 1;

            let Some(data) = page.data else {
                tracing::debug!(pages, "Page without data, stopping pagination");
                break;
            };
            items.extend(data);

            next = match page.paging.and_then(|p| p.next) {
                Some(link) if link == current => {
                    tracing::warn!("Pagination link points at the current page, stopping");
                    None
                }
                Some(link) => Some(parse_url(&link)?),
                None => None,
            };
        }

        tracing::debug!(pages, items = items.len(), "Pagination complete");
        Ok(items)
    }

    /// All of the user's media in the window, minus excluded ids and videos.
    pub async fn list_media(&mut self, query: &MediaQuery) -> Result<Vec<MediaItem>, InstagramError> {
        let user_id = self.store.credential().user_id.clone();
        let mut params = vec![("fields", MEDIA_FIELDS.to_string())];
        if let Some(since) = query.since {
            params.push(("since", since.timestamp().to_string()));
        }
        if let Some(until) = query.until {
            params.push(("until", until.timestamp().to_string()));
        }
        let url = self.graph_url(&format!("{user_id}/media"), &params)?;

        let fetched = self.collect_pages(url).await?;
        let total = fetched.len();
        let mut items: Vec<MediaItem> = fetched
            .into_iter()
            .filter(|item| !query.excluded_ids.contains(&item.id))
            .filter(|item| item.media_type != MediaType::Video)
            .collect();
        tracing::info!(
            fetched = total,
            kept = items.len(),
            "Listed Instagram media"
        );

        if query.include_children {
            for item in items
                .iter_mut()
                .filter(|item| item.media_type == MediaType::CarouselAlbum)
            {
                item.children = self.fetch_children(&item.id).await?;
            }
        }

        Ok(items)
    }

    /// Non-video children of a carousel album.
    pub async fn fetch_children(&mut self, media_id: &str) -> Result<Vec<MediaItem>, InstagramError> {
        let url = self.graph_url(
            &format!("{media_id}/children"),
            &[("fields", CHILD_FIELDS.to_string())],
        )?;
        let children = self.collect_pages(url).await?;
        Ok(children
            .into_iter()
            .filter(|child| child.media_type != MediaType::Video)
            .collect())
    }

    pub async fn user_profile(&mut self) -> Result<UserProfile, InstagramError> {
        let user_id = self.store.credential().user_id.clone();
        let url = self.graph_url(&user_id, &[("fields", USER_FIELDS.to_string())])?;
        self.get_json(url).await
    }

    /// Stream `url` into `destination` via a `.part` sibling.
    ///
    /// A non-2xx answer yields `Ok(None)` so the caller can skip the image.
    pub async fn download_media(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<Option<PathBuf>, InstagramError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(InstagramError::transport)?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                "Download for {} failed, skipping",
                destination.display()
            );
            return Ok(None);
        }

        let part_path = part_path(destination);
        let disk_err = |source: std::io::Error| InstagramError::Disk {
            path: part_path.clone(),
            source,
        };

        let mut file = fs::File::create(&part_path).await.map_err(disk_err)?;
        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&part_path).await;
                    return Err(InstagramError::transport(e));
                }
            };
            file.write_all(&chunk).await.map_err(disk_err)?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await.map_err(disk_err)?;
        drop(file);

        fs::rename(&part_path, destination)
            .await
            .map_err(|source| InstagramError::Disk {
                path: destination.to_path_buf(),
                source,
            })?;
        tracing::debug!(bytes = bytes_written, "Downloaded {}", destination.display());
        Ok(Some(destination.to_path_buf()))
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
