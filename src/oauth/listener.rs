//! Short-lived redirect target for Instagram's authorization-code flow.
//!
//! The listener binds a fixed local port (retrying while the port is busy),
//! serves `GET /` on its own tokio task, and drops the first `code` (or
//! `authorization_code`) query value into an [`AuthorizationCapture`]. The
//! caller polls that cell through [`CaptureListener::wait_for_code`] and must
//! call [`CaptureListener::stop`] afterwards, whatever the outcome.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::AuthorizationCapture;
use super::error::ListenerError;
use super::tls::{self, TlsListener, TlsSettings};
use crate::retry::{self, RetryAction, RetryConfig};

pub const SUCCESS_MESSAGE: &str = "OAuth Authorization code was successfully retrieved.";
pub const MISSING_MESSAGE: &str = "Missing OAuth Authorization code from request!";

/// Query parameters that may carry the authorization code.
const CODE_PARAMS: &[&str] = &["code", "authorization_code"];

/// How long `stop()` waits for open connections to drain.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    pub tls: Option<TlsSettings>,
    pub retry: RetryConfig,
}

#[derive(Serialize)]
struct MessageBody {
    message: &'static str,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

pub struct CaptureListener {
    config: ListenerConfig,
    capture: AuthorizationCapture,
    running: Option<Running>,
}

impl std::fmt::Debug for CaptureListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureListener")
            .field("bind", &self.config.bind)
            .field("tls", &self.config.tls.is_some())
            .field("running", &self.local_addr())
            .finish()
    }
}

impl CaptureListener {
    pub fn new(config: ListenerConfig, capture: AuthorizationCapture) -> Self {
        Self {
            config,
            capture,
            running: None,
        }
    }

    #[cfg(test)]
    pub fn capture(&self) -> &AuthorizationCapture {
        &self.capture
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind and start serving. TLS material is loaded before the first bind
    /// attempt so a missing passphrase never reaches the network.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let tls_config = self
            .config
            .tls
            .as_ref()
            .map(tls::load_server_config)
            .transpose()?;

        let (listener, attempts) = bind_with_retry(self.config.bind, &self.config.retry).await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: self.config.bind,
            attempts,
            source,
        })?;

        let app = router(self.capture.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();

        let task = match tls_config {
            Some(server_config) => {
                let listener = TlsListener::new(listener, server_config).map_err(|source| {
                    ListenerError::Bind {
                        addr: self.config.bind,
                        attempts,
                        source,
                    }
                })?;
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(signal)
                        .await
                })
            }
            None => tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            }),
        };

        tracing::info!(
            tls = self.config.tls.is_some(),
            "OAuth listener started on {} (attempt {})",
            local_addr,
            attempts
        );
        self.running = Some(Running {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Poll the capture cell every `poll_interval` until a code arrives.
    ///
    /// Returns `Terminated` if the server task has exited and `Interrupted`
    /// if `shutdown` fires first. Never stops the listener itself.
    pub async fn wait_for_code(
        &mut self,
        poll_interval: Duration,
        shutdown: &CancellationToken,
    ) -> Result<String, ListenerError> {
        loop {
            if let Some(code) = self.capture.get() {
                return Ok(code);
            }

            let finished = match &self.running {
                Some(running) => running.task.is_finished(),
                None => return Err(ListenerError::NotStarted),
            };
            if finished {
                let reason = match self.running.take() {
                    Some(running) => match running.task.await {
                        Ok(Ok(())) => "server exited".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => e.to_string(),
                    },
                    None => "server exited".to_string(),
                };
                return Err(ListenerError::Terminated(reason));
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => return Err(ListenerError::Interrupted),
            }
        }
    }

    /// Gracefully shut the server down. No-op when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!("OAuth listener shutdown requested on {}", running.local_addr);
        running.shutdown.cancel();

        let abort = running.task.abort_handle();
        match tokio::time::timeout(STOP_GRACE, running.task).await {
            Ok(Ok(Ok(()))) => tracing::debug!("OAuth listener stopped"),
            Ok(Ok(Err(e))) => tracing::warn!("OAuth listener exited with error: {}", e),
            Ok(Err(e)) => tracing::warn!("OAuth listener task failed: {}", e),
            Err(_) => {
                tracing::warn!("OAuth listener did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for CaptureListener {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            running.task.abort();
        }
    }
}

/// Bind `addr`, retrying with a fixed delay while the address is busy.
/// Returns the listener and the attempt that succeeded.
async fn bind_with_retry(
    addr: SocketAddr,
    config: &RetryConfig,
) -> Result<(TcpListener, u32), ListenerError> {
    retry::retry_with_delay(config, classify_bind_error, |attempt| async move {
        tracing::debug!("Binding OAuth listener on {} (attempt {})", addr, attempt);
        TcpListener::bind(addr)
            .await
            .map(|listener| (listener, attempt))
    })
    .await
    .map_err(|e| ListenerError::Bind {
        addr,
        attempts: e.attempts,
        source: e.last_error,
    })
}

fn classify_bind_error(e: &io::Error) -> RetryAction {
    match e.kind() {
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied => RetryAction::Retry,
        _ => RetryAction::Abort,
    }
}

fn router(capture: AuthorizationCapture) -> Router {
    Router::new()
        .route("/", get(handle_redirect))
        .with_state(capture)
}

async fn handle_redirect(
    State(capture): State<AuthorizationCapture>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Json<MessageBody>) {
    let query = query.unwrap_or_default();
    let mut code: Option<String> = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            k if CODE_PARAMS.contains(&k) && !value.is_empty() && code.is_none() => {
                code = Some(value.into_owned());
            }
            "error" | "error_description" | "error_reason" => {
                tracing::warn!("Authorization redirect reported {}: {}", key, value);
            }
            _ => {}
        }
    }

    if let Some(code) = code {
        if capture.offer(&code) {
            tracing::info!("Authorization code captured");
        } else {
            tracing::debug!("Authorization code already captured, ignoring new one");
        }
    }

    if capture.is_set() {
        (
            StatusCode::OK,
            Json(MessageBody {
                message: SUCCESS_MESSAGE,
            }),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(MessageBody {
                message: MISSING_MESSAGE,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn quick_config(bind: SocketAddr, max_attempts: u32, delay_ms: u64) -> ListenerConfig {
        ListenerConfig {
            bind,
            tls: None,
            retry: RetryConfig {
                max_attempts,
                delay: Duration::from_millis(delay_ms),
            },
        }
    }

    fn loopback_any_port() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn started_listener() -> (CaptureListener, SocketAddr) {
        let mut listener =
            CaptureListener::new(quick_config(loopback_any_port(), 1, 0), Default::default());
        let addr = listener.start().await.unwrap();
        (listener, addr)
    }

    async fn get(addr: SocketAddr, path_and_query: &str) -> (u16, Value) {
        let response = reqwest::get(format!("http://{addr}{path_and_query}"))
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_captures_code_and_responds_ok() {
        let (mut listener, addr) = started_listener().await;

        let (status, body) = get(addr, "/?code=ABC123").await;

        assert_eq!(status, 200);
        assert_eq!(body["message"], SUCCESS_MESSAGE);
        assert_eq!(listener.capture().get().as_deref(), Some("ABC123"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bare_request_without_code_is_bad_request() {
        let (mut listener, addr) = started_listener().await;

        let (status, body) = get(addr, "/").await;

        assert_eq!(status, 400);
        assert_eq!(body["message"], MISSING_MESSAGE);
        assert!(listener.capture().get().is_none());
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_accepts_authorization_code_param() {
        let (mut listener, addr) = started_listener().await;

        let (status, _) = get(addr, "/?authorization_code=XYZ&state=1").await;

        assert_eq!(status, 200);
        assert_eq!(listener.capture().get().as_deref(), Some("XYZ"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_first_code_is_kept_and_later_requests_succeed() {
        let (mut listener, addr) = started_listener().await;

        get(addr, "/?code=first").await;
        let (status, _) = get(addr, "/?code=second").await;
        let (bare_status, _) = get(addr, "/").await;

        assert_eq!(status, 200);
        assert_eq!(bare_status, 200);
        assert_eq!(listener.capture().get().as_deref(), Some("first"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_empty_code_value_is_ignored() {
        let (mut listener, addr) = started_listener().await;

        let (status, _) = get(addr, "/?code=").await;

        assert_eq!(status, 400);
        assert!(!listener.capture().is_set());
        listener.stop().await;
    }

    async fn started_tls_listener() -> (CaptureListener, SocketAddr) {
        let mut config = quick_config(loopback_any_port(), 1, 0);
        config.tls = Some(tls::tests::fixture_settings());
        let mut listener = CaptureListener::new(config, Default::default());
        let addr = listener.start().await.unwrap();
        (listener, addr)
    }

    async fn get_https(addr: SocketAddr, path_and_query: &str) -> reqwest::Result<u16> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(3))
            .build()?;
        let response = client
            .get(format!("https://{addr}{path_and_query}"))
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    #[tokio::test]
    async fn test_captures_code_over_https() {
        let (mut listener, addr) = started_tls_listener().await;

        assert_eq!(get_https(addr, "/?code=ABC123").await.unwrap(), 200);

        assert_eq!(listener.capture().get().as_deref(), Some("ABC123"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_silent_connection_does_not_block_https_redirect() {
        let (mut listener, addr) = started_tls_listener().await;

        // connects like a browser preconnect and never sends a ClientHello
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(get_https(addr, "/?code=ABC123").await.unwrap(), 200);
        assert_eq!(listener.capture().get().as_deref(), Some("ABC123"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_succeeds_once_port_is_released() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();
        let config = RetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(200),
        };

        // attempts at ~0ms, ~200ms, ~400ms; the port frees up in between #2 and #3
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(holder);
        });

        let (_listener, attempts) = bind_with_retry(addr, &config).await.unwrap();
        release.await.unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_bind_gives_up_after_five_attempts() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();
        let mut listener = CaptureListener::new(quick_config(addr, 5, 10), Default::default());

        let err = listener.start().await.unwrap_err();

        match err {
            ListenerError::Bind { attempts, source, .. } => {
                assert_eq!(attempts, 5);
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(listener.local_addr().is_none());
        drop(holder);
    }

    #[tokio::test]
    async fn test_missing_passphrase_fails_before_bind() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();
        let mut config = quick_config(addr, 5, 1000);
        config.tls = Some(TlsSettings {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
            passphrase: None,
        });
        let mut listener = CaptureListener::new(config, Default::default());

        let started = std::time::Instant::now();
        let err = listener.start().await.unwrap_err();

        assert!(matches!(err, ListenerError::MissingPassphrase));
        // no bind retries were attempted
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_wait_for_code_returns_captured_code() {
        let (mut listener, addr) = started_listener().await;
        let shutdown = CancellationToken::new();

        let client = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            get(addr, "/?code=polled").await
        });

        let code = listener
            .wait_for_code(Duration::from_millis(20), &shutdown)
            .await
            .unwrap();
        assert_eq!(code, "polled");
        assert_eq!(client.await.unwrap().0, 200);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_wait_for_code_interrupted() {
        let (mut listener, _addr) = started_listener().await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = listener
            .wait_for_code(Duration::from_secs(5), &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, ListenerError::Interrupted));
        listener.stop().await;
        assert!(listener.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_code_reports_dead_server() {
        let (mut listener, _addr) = started_listener().await;
        if let Some(running) = &listener.running {
            running.task.abort();
        }

        let err = listener
            .wait_for_code(Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ListenerError::Terminated(_)));
    }

    #[tokio::test]
    async fn test_wait_without_start() {
        let mut listener =
            CaptureListener::new(quick_config(loopback_any_port(), 1, 0), Default::default());
        let err = listener
            .wait_for_code(Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::NotStarted));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut never_started =
            CaptureListener::new(quick_config(loopback_any_port(), 1, 0), Default::default());
        never_started.stop().await;

        let (mut listener, addr) = started_listener().await;
        listener.stop().await;
        listener.stop().await;
        assert!(reqwest::get(format!("http://{addr}/")).await.is_err());
    }
}
