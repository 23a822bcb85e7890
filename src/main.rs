//! instagram-to-wordpress: republish Instagram media as WordPress posts.
//!
//! `authorize` runs the one-time Instagram OAuth handshake through a local
//! redirect listener and stores a long-lived token. `migrate` fetches media
//! newer than the stored watermark, downloads the images and creates one
//! backdated WordPress post per Instagram post, advancing the watermark
//! after each. `status` shows what is stored.

#![warn(clippy::all)]

mod cli;
mod config;
mod credentials;
mod instagram;
mod migrate;
mod oauth;
mod retry;
mod shutdown;
mod types;
mod wordpress;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use credentials::TokenStore;
use instagram::InstagramClient;
use wordpress::WordPressClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

async fn load_instagram(http: reqwest::Client, path: &Path) -> anyhow::Result<InstagramClient> {
    let store = TokenStore::load(path)
        .await
        .context("Run `instagram-to-wordpress authorize` first")?;
    Ok(InstagramClient::connect(http, instagram::Endpoints::default(), store).await?)
}

/// Run the authorize command.
async fn run_authorize(
    credentials_path: &Path,
    args: cli::AuthorizeArgs,
    shutdown: &tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let options = config::authorize_options(credentials_path.to_path_buf(), args)?;
    let credential = oauth::authorize(
        &http_client()?,
        &instagram::Endpoints::default(),
        &options,
        shutdown,
    )
    .await?;

    println!("Saved credentials to {}", credentials_path.display());
    if let Some(expiry) = credential.expiry() {
        println!("Token expires: {}", expiry.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

/// Run the status command.
async fn run_status(credentials_path: &Path) -> anyhow::Result<()> {
    if !credentials_path.exists() {
        println!("No credentials found at {}", credentials_path.display());
        println!("Run `instagram-to-wordpress authorize` first.");
        return Ok(());
    }

    let mut client = load_instagram(http_client()?, credentials_path).await?;
    let credential = client.credential().clone();

    println!("Credentials: {}", credentials_path.display());
    println!();
    println!("Instagram user ID: {}", credential.user_id);
    match credential.expiry() {
        Some(expiry) => println!(
            "Token expires:     {}",
            expiry.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Token expires:     unknown"),
    }
    match credential.watermark() {
        Some(w) => println!("Last migrated:     {}", w.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last migrated:     never"),
    }

    let profile = client.user_profile().await?;
    println!();
    println!("Profile:");
    println!("  Username:     {}", profile.username);
    println!("  Account type: {}", profile.account_type);
    if let Some(count) = profile.media_count {
        println!("  Media count:  {}", count);
    }
    Ok(())
}

/// Run the migrate command.
async fn run_migrate(
    credentials_path: &Path,
    args: cli::MigrateArgs,
    shutdown: &tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let config = config::MigrateConfig::from_args(args)?;
    let options = config.options;
    let http = http_client()?;

    let mut instagram = load_instagram(http.clone(), credentials_path).await?;
    let items = migrate::select_media(&mut instagram, &options).await?;
    if items.is_empty() {
        println!("No new Instagram posts to migrate.");
        return Ok(());
    }
    tracing::info!(count = items.len(), "Found new Instagram posts");

    let Some(credentials) = config.wordpress else {
        migrate::report_dry_run(&items, &options);
        return Ok(());
    };

    let endpoints = wordpress::Endpoints::for_site(&credentials.site);
    let mut wordpress = WordPressClient::connect(http, endpoints, credentials)
        .await
        .context("Failed to authenticate with WordPress")?;

    let summary =
        migrate::publish_all(&mut instagram, &mut wordpress, &items, &options, shutdown).await?;

    println!();
    println!("── Summary ──");
    println!("  {} published, {} skipped", summary.published, summary.skipped);
    if summary.interrupted {
        println!("  Interrupted before all posts were processed.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let credentials_path = config::expand_tilde(&cli.credentials);
    let shutdown_token = shutdown::install_signal_handler()?;

    match cli.command {
        Command::Authorize(args) => run_authorize(&credentials_path, args, &shutdown_token).await,
        Command::Migrate(args) => run_migrate(&credentials_path, args, &shutdown_token).await,
        Command::Status => run_status(&credentials_path).await,
    }
}
