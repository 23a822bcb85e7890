//! One-time Instagram OAuth handshake.
//!
//! 1. Print the authorize URL for the user to open.
//! 2. Run a [`CaptureListener`] on the redirect port until the code arrives.
//! 3. Exchange code → short-lived token → long-lived token.
//! 4. Write the credential file, keeping the watermark of the same account.

pub mod capture;
pub mod error;
pub mod listener;
pub mod tls;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::credentials::{Credential, CredentialError, TokenStore};
use crate::instagram::responses::{ShortLivedToken, TokenGrant};
use crate::instagram::{self, Endpoints, InstagramError};

pub use self::capture::AuthorizationCapture;
pub use self::error::{ListenerError, OAuthError};
pub use self::listener::{CaptureListener, ListenerConfig};
pub use self::tls::TlsSettings;

pub const DEFAULT_SCOPE: &str = "user_profile,user_media";

/// Instagram app registration.
#[derive(Debug, Clone)]
pub struct InstagramApp {
    pub app_id: String,
    pub app_secret: SecretString,
}

#[derive(Debug, Clone)]
pub struct AuthorizeOptions {
    pub app: InstagramApp,
    /// Must match the redirect URI registered for the app.
    pub redirect_uri: String,
    pub scope: String,
    pub listener: ListenerConfig,
    pub poll_interval: Duration,
    pub credentials_path: PathBuf,
}

pub fn authorization_url(
    endpoints: &Endpoints,
    app_id: &str,
    redirect_uri: &str,
    scope: &str,
) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        &endpoints.authorize(),
        &[
            ("client_id", app_id),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("response_type", "code"),
        ],
    )
}

/// Run the whole handshake and return the saved credential.
pub async fn authorize(
    http: &Client,
    endpoints: &Endpoints,
    options: &AuthorizeOptions,
    shutdown: &CancellationToken,
) -> Result<Credential, OAuthError> {
    let url = authorization_url(
        endpoints,
        &options.app.app_id,
        &options.redirect_uri,
        &options.scope,
    )?;
    println!("Open the following URL in a browser and approve access:");
    println!();
    println!("  {url}");
    println!();

    let code = capture_code(options, shutdown).await?;
    tracing::info!("Authorization code received, requesting long-lived token");

    let credential = exchange_code(
        http,
        endpoints,
        &options.app,
        &options.redirect_uri,
        &code,
    )
    .await?;
    Ok(save_credential(&options.credentials_path, credential).await?)
}

/// Start the listener, wait for the code, and always stop the listener.
async fn capture_code(
    options: &AuthorizeOptions,
    shutdown: &CancellationToken,
) -> Result<String, ListenerError> {
    let mut listener = CaptureListener::new(options.listener.clone(), AuthorizationCapture::new());
    let outcome = match listener.start().await {
        Ok(addr) => {
            tracing::info!("Waiting for the authorization redirect on {}", addr);
            listener
                .wait_for_code(options.poll_interval, shutdown)
                .await
        }
        Err(e) => Err(e),
    };
    listener.stop().await;
    outcome
}

/// Trade an authorization code for a long-lived token.
pub async fn exchange_code(
    http: &Client,
    endpoints: &Endpoints,
    app: &InstagramApp,
    redirect_uri: &str,
    code: &str,
) -> Result<Credential, InstagramError> {
    let short_url = endpoints.short_lived_token();
    tracing::debug!("POST {}", short_url);
    let form = [
        ("client_id", app.app_id.as_str()),
        ("client_secret", app.app_secret.expose_secret()),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
        ("code", code),
    ];
    let body = instagram::send_for_text(http.post(&short_url).form(&form), &short_url).await?;
    let short: ShortLivedToken = instagram::decode(&short_url, &body)?;
    let missing = |field| InstagramError::MissingField {
        url: short_url.clone(),
        field,
        body: body.clone(),
    };
    let short_token = short.access_token.ok_or_else(|| missing("access_token"))?;
    let user_id = short.user_id.ok_or_else(|| missing("user_id"))?;
    tracing::debug!(user_id = %user_id, "Obtained short-lived token");

    let mut url = instagram::parse_url(&endpoints.long_lived_token())?;
    url.query_pairs_mut()
        .append_pair("grant_type", "ig_exchange_token")
        .append_pair("client_secret", app.app_secret.expose_secret())
        .append_pair("access_token", &short_token);
    let shown = instagram::redact_url(&url);
    tracing::debug!("GET {}", shown);
    let long_body = instagram::send_for_text(http.get(url), &shown).await?;
    let grant: TokenGrant = instagram::decode(&shown, &long_body)?;
    let (access_token, expires_in) = instagram::require_grant(grant, &shown, &long_body)?;

    Ok(Credential {
        access_token,
        user_id,
        expires_at: Utc::now().timestamp() + expires_in,
        last_post_fetch: 0,
    })
}

/// Write `credential`, carrying over the watermark if the file already
/// belongs to the same account.
pub async fn save_credential(
    path: &Path,
    mut credential: Credential,
) -> Result<Credential, CredentialError> {
    match TokenStore::load(path).await {
        Ok(existing) if existing.credential().user_id == credential.user_id => {
            credential.last_post_fetch = existing.credential().last_post_fetch;
            tracing::debug!(
                watermark = credential.last_post_fetch,
                "Keeping existing watermark"
            );
        }
        Ok(_) => tracing::info!("Credential file belonged to another account, watermark reset"),
        Err(_) => {}
    }
    let store = TokenStore::create(path, credential).await?;
    tracing::info!("Saved Instagram credentials to {}", path.display());
    Ok(store.credential().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::{sample_credential, test_dir};
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::net::SocketAddr;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app() -> InstagramApp {
        InstagramApp {
            app_id: "688975250098546".to_string(),
            app_secret: SecretString::from("app-secret"),
        }
    }

    async fn mount_exchange(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/access_token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=ABC123"))
            .and(body_string_contains("client_id=688975250098546"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-token",
                "user_id": 17841400000000000u64
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/access_token"))
            .and(query_param("grant_type", "ig_exchange_token"))
            .and(query_param("access_token", "short-token"))
            .and(query_param("client_secret", "app-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "long-token",
                "token_type": "bearer",
                "expires_in": 5_184_000
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn free_port() -> u16 {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    fn options_for(port: u16, credentials_path: PathBuf) -> AuthorizeOptions {
        AuthorizeOptions {
            app: app(),
            redirect_uri: format!("http://localhost:{port}/"),
            scope: DEFAULT_SCOPE.to_string(),
            listener: ListenerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], port)),
                tls: None,
                retry: RetryConfig {
                    max_attempts: 5,
                    delay: Duration::from_millis(50),
                },
            },
            poll_interval: Duration::from_millis(20),
            credentials_path,
        }
    }

    #[test]
    fn test_authorization_url() {
        let url = authorization_url(
            &Endpoints::default(),
            "123",
            "https://localhost:8000/",
            DEFAULT_SCOPE,
        )
        .unwrap();
        assert_eq!(url.host_str(), Some("api.instagram.com"));
        assert_eq!(url.path(), "/oauth/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("redirect_uri".into(), "https://localhost:8000/".into())));
        assert!(pairs.contains(&("scope".into(), "user_profile,user_media".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        mount_exchange(&server).await;

        let before = Utc::now().timestamp();
        let credential = exchange_code(
            &Client::new(),
            &Endpoints::with_base(&server.uri()),
            &app(),
            "https://localhost:8000/",
            "ABC123",
        )
        .await
        .unwrap();

        assert_eq!(credential.access_token, "long-token");
        assert_eq!(credential.user_id, "17841400000000000");
        assert!(credential.expires_at >= before + 5_184_000);
        assert_eq!(credential.last_post_fetch, 0);
    }

    #[tokio::test]
    async fn test_exchange_requires_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "x"})))
            .mount(&server)
            .await;

        let err = exchange_code(
            &Client::new(),
            &Endpoints::with_base(&server.uri()),
            &app(),
            "https://localhost:8000/",
            "ABC123",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InstagramError::MissingField { field: "user_id", .. }));
    }

    #[tokio::test]
    async fn test_exchange_error_redacts_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-token",
                "user_id": "42"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad secret"))
            .mount(&server)
            .await;

        let err = exchange_code(
            &Client::new(),
            &Endpoints::with_base(&server.uri()),
            &app(),
            "https://localhost:8000/",
            "ABC123",
        )
        .await
        .unwrap_err();
        match err {
            InstagramError::Api { url, status, .. } => {
                assert_eq!(status, 400);
                assert!(!url.contains("app-secret"));
                assert!(!url.contains("short-token"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_save_credential_keeps_watermark_of_same_account() {
        let dir = test_dir("oauth_save_same");
        let path = dir.join("credentials.json");
        let old = Credential {
            last_post_fetch: 1_700_000_000,
            ..sample_credential(10)
        };
        TokenStore::create(&path, old).await.unwrap();

        let fresh = Credential {
            access_token: "long-token".to_string(),
            ..sample_credential(99)
        };
        let saved = save_credential(&path, fresh).await.unwrap();

        assert_eq!(saved.last_post_fetch, 1_700_000_000);
        assert_eq!(
            TokenStore::load(&path).await.unwrap().credential().access_token,
            "long-token"
        );
    }

    #[tokio::test]
    async fn test_save_credential_resets_watermark_for_other_account() {
        let dir = test_dir("oauth_save_other");
        let path = dir.join("credentials.json");
        let old = Credential {
            last_post_fetch: 1_700_000_000,
            ..sample_credential(10)
        };
        TokenStore::create(&path, old).await.unwrap();

        let fresh = Credential {
            user_id: "999".to_string(),
            ..sample_credential(99)
        };
        assert_eq!(save_credential(&path, fresh).await.unwrap().last_post_fetch, 0);
    }

    #[tokio::test]
    async fn test_authorize_end_to_end() {
        let server = MockServer::start().await;
        mount_exchange(&server).await;
        let port = free_port();
        let dir = test_dir("oauth_e2e");
        let options = options_for(port, dir.join("credentials.json"));

        let browser = tokio::spawn(async move {
            let url = format!("http://127.0.0.1:{port}/?code=ABC123");
            for _ in 0..100 {
                if let Ok(response) = reqwest::get(&url).await {
                    return response.status().as_u16();
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            0
        });

        let credential = authorize(
            &Client::new(),
            &Endpoints::with_base(&server.uri()),
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(browser.await.unwrap(), 200);
        assert_eq!(credential.access_token, "long-token");
        let stored = TokenStore::load(&options.credentials_path).await.unwrap();
        assert_eq!(stored.credential().user_id, "17841400000000000");
        // listener released the port
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn test_authorize_interrupted_stops_listener() {
        let server = MockServer::start().await;
        let port = free_port();
        let dir = test_dir("oauth_interrupt");
        let options = options_for(port, dir.join("credentials.json"));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = authorize(
            &Client::new(),
            &Endpoints::with_base(&server.uri()),
            &options,
            &shutdown,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            OAuthError::Listener(ListenerError::Interrupted)
        ));
        assert!(!options.credentials_path.exists());
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }
}
