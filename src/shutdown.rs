//! Signal handling.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels a [`CancellationToken`]: the
//! OAuth wait loop turns that into an interrupt error (after stopping the
//! listener) and the migration loop stops between posts. A second signal
//! exits immediately with status 130.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Exit status for a forced exit, as a shell reports death by SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

#[cfg(unix)]
struct Signals {
    sigterm: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            sighup: signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
        })
    }

    /// Name of the next signal received, or `None` if listening failed.
    async fn next(&mut self) -> Option<&'static str> {
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.ok().map(|_| "SIGINT"),
            r = self.sigterm.recv() => r.map(|_| "SIGTERM"),
            r = self.sighup.recv() => r.map(|_| "SIGHUP"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "Ctrl+C")
    }
}

/// Register the handlers and return the token they cancel.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut signals = Signals::register()?;

    let handler_token = token.clone();
    tokio::spawn(async move {
        let Some(first) = signals.next().await else {
            tracing::warn!("Unable to listen for shutdown signals");
            return;
        };
        tracing::info!(signal = first, "Shutdown requested, stopping after the current step");
        tracing::info!("Press Ctrl+C again to force exit");
        handler_token.cancel();

        if let Some(second) = signals.next().await {
            tracing::warn!(signal = second, "Force exit requested");
            std::process::exit(FORCED_EXIT_CODE);
        }
    });

    Ok(token)
}
