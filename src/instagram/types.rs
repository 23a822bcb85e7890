use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Graph API `media_type`. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum MediaType {
    Image,
    Video,
    CarouselAlbum,
    Other(String),
}

impl From<String> for MediaType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "IMAGE" => MediaType::Image,
            "VIDEO" => MediaType::Video,
            "CAROUSEL_ALBUM" => MediaType::CarouselAlbum,
            _ => MediaType::Other(value),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Image => f.write_str("IMAGE"),
            MediaType::Video => f.write_str("VIDEO"),
            MediaType::CarouselAlbum => f.write_str("CAROUSEL_ALBUM"),
            MediaType::Other(s) => f.write_str(s),
        }
    }
}

/// A post (or carousel child) as returned by the media edge.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default = "unknown_media_type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, deserialize_with = "graph_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Filled by the client for carousels; never part of the wire payload.
    #[serde(skip)]
    pub children: Vec<MediaItem>,
}

fn unknown_media_type() -> MediaType {
    MediaType::Other(String::new())
}

impl MediaItem {
    /// URLs of the still images this item contributes to a post, in order.
    /// An image without `media_url` falls back to its `thumbnail_url`.
    pub fn image_urls(&self) -> Vec<&str> {
        match self.media_type {
            MediaType::Video => Vec::new(),
            MediaType::CarouselAlbum => self
                .children
                .iter()
                .filter(|child| child.media_type != MediaType::Video)
                .filter_map(|child| child.media_url.as_deref().or(child.thumbnail_url.as_deref()))
                .collect(),
            MediaType::Image | MediaType::Other(_) => self
                .media_url
                .as_deref()
                .or(self.thumbnail_url.as_deref())
                .into_iter()
                .collect(),
        }
    }
}

/// Instagram timestamps look like `2024-03-10T12:34:56+0000`.
fn graph_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => parse_graph_timestamp(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
    }
}

pub(crate) fn parse_graph_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub media_count: Option<u64>,
}
