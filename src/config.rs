//! Validated settings built from the parsed CLI.
//!
//! Secrets arrive through clap's `env` support as `Option<String>`; a
//! missing one is reported here, naming the environment variable, before any
//! network call is made.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use secrecy::SecretString;

use crate::cli::{AuthorizeArgs, MigrateArgs, WordPressArgs};
use crate::migrate::MigrateOptions;
use crate::oauth::{AuthorizeOptions, InstagramApp, ListenerConfig, TlsSettings};
use crate::retry::RetryConfig;
use crate::wordpress::WordPressCredentials;

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// A set, non-blank value or an error naming `var`.
fn require(value: Option<String>, var: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("Missing configuration: set the {} environment variable", var),
    }
}

pub fn authorize_options(
    credentials_path: PathBuf,
    args: AuthorizeArgs,
) -> anyhow::Result<AuthorizeOptions> {
    let app = InstagramApp {
        app_id: require(args.app_id, "INSTAGRAM_APP_ID")?,
        app_secret: SecretString::from(require(args.app_secret, "INSTAGRAM_APP_SECRET")?),
    };

    url::Url::parse(&args.redirect_uri)
        .with_context(|| format!("Invalid redirect URI '{}'", args.redirect_uri))?;
    let host: IpAddr = args
        .host
        .parse()
        .with_context(|| format!("Invalid listener address '{}'", args.host))?;

    let tls = if args.no_tls {
        None
    } else {
        Some(TlsSettings {
            cert_path: expand_tilde(&args.cert),
            key_path: expand_tilde(&args.key),
            passphrase: args.ssl_password.map(SecretString::from),
        })
    };

    Ok(AuthorizeOptions {
        app,
        redirect_uri: args.redirect_uri,
        scope: args.scope,
        listener: ListenerConfig {
            bind: SocketAddr::new(host, args.port),
            tls,
            retry: RetryConfig::default(),
        },
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        credentials_path,
    })
}

fn wordpress_credentials(args: WordPressArgs) -> anyhow::Result<WordPressCredentials> {
    Ok(WordPressCredentials {
        client_id: require(args.wordpress_client_id, "WORDPRESS_CLIENT_ID")?,
        client_secret: SecretString::from(require(
            args.wordpress_client_secret,
            "WORDPRESS_CLIENT_SECRET",
        )?),
        username: require(args.wordpress_username, "WORDPRESS_USERNAME")?,
        application_password: SecretString::from(require(
            args.wordpress_application_password,
            "WORDPRESS_APPLICATION_PASSWORD",
        )?),
        site: require(args.wordpress_site, "WORDPRESS_SITE")?,
    })
}

#[derive(Debug)]
pub struct MigrateConfig {
    pub options: MigrateOptions,
    /// `None` only for dry runs, which never contact WordPress.
    pub wordpress: Option<WordPressCredentials>,
}

impl MigrateConfig {
    pub fn from_args(args: MigrateArgs) -> anyhow::Result<Self> {
        let wordpress = if args.dry_run {
            None
        } else {
            Some(wordpress_credentials(args.wordpress)?)
        };
        let since = args
            .since
            .as_deref()
            .map(parse_date_or_interval)
            .transpose()?;

        Ok(Self {
            options: MigrateOptions {
                since,
                excluded_ids: args.exclude.into_iter().collect::<HashSet<_>>(),
                categories: args.categories,
                category_hashtags: args.category_hashtags,
                author: args.author.filter(|a| !a.trim().is_empty()),
                staging_dir: expand_tilde(&args.staging_dir),
                dry_run: args.dry_run,
                no_progress_bar: args.no_progress_bar,
            },
            wordpress,
        })
    }
}

/// Parse `20d` (days ago), `2025-01-02` or `2025-01-02T14:30:00`, the last
/// two in local time.
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(Utc::now() - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(dt) = naive_dt.and_local_timezone(Local).single() {
                return Ok(dt.with_timezone(&Utc));
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = dt.and_local_timezone(Local).single() {
            return Ok(local.with_timezone(&Utc));
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2025-01-02), \
         datetime (2025-01-02T14:30:00), or interval (20d)",
        s
    )
}
