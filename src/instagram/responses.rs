//! Wire structs for Instagram OAuth and Graph API responses.

use serde::Deserialize;

/// One page of an edge listing (`/media`, `/children`).
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    pub data: Option<Vec<T>>,
    pub paging: Option<Paging>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

/// Long-lived token, from both the exchange and the refresh routes.
#[derive(Deserialize)]
pub(crate) struct TokenGrant {
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Short-lived token from the authorization-code exchange.
#[derive(Deserialize)]
pub(crate) struct ShortLivedToken {
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "optional_user_id")]
    pub user_id: Option<String>,
}

fn optional_user_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "crate::credentials::string_or_number")] String);
    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instagram::types::MediaItem;

    #[test]
    fn test_page_without_data() {
        let page: Page<MediaItem> = serde_json::from_str(r#"{"paging": {}}"#).unwrap();
        assert!(page.data.is_none());
        assert!(page.paging.unwrap().next.is_none());
    }

    #[test]
    fn test_short_lived_numeric_user_id() {
        let token: ShortLivedToken =
            serde_json::from_str(r#"{"access_token": "x", "user_id": 17841400}"#).unwrap();
        assert_eq!(token.user_id.as_deref(), Some("17841400"));

        let missing: ShortLivedToken = serde_json::from_str(r#"{"access_token": "x"}"#).unwrap();
        assert!(missing.user_id.is_none());
    }
}
