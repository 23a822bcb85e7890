use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "instagram-to-wordpress",
    version,
    about = "Republish Instagram media as WordPress posts"
)]
pub struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Instagram credential file
    #[arg(
        long,
        default_value = "~/.instagram-to-wordpress/credentials.json",
        global = true
    )]
    pub credentials: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the Instagram OAuth handshake and save a long-lived token
    Authorize(AuthorizeArgs),
    /// Publish new Instagram posts to WordPress
    Migrate(MigrateArgs),
    /// Show the stored credential and Instagram profile
    Status,
}

#[derive(Args, Debug)]
pub struct AuthorizeArgs {
    /// Instagram app ID
    #[arg(long, env = "INSTAGRAM_APP_ID")]
    pub app_id: Option<String>,

    /// Instagram app secret.
    /// Prefer the INSTAGRAM_APP_SECRET environment variable.
    #[arg(long, env = "INSTAGRAM_APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Redirect URI registered for the app
    #[arg(long, default_value = "https://localhost:8000/")]
    pub redirect_uri: String,

    /// Requested permissions
    #[arg(long, default_value = crate::oauth::DEFAULT_SCOPE)]
    pub scope: String,

    /// Address the redirect listener binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the redirect listener binds to
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// TLS certificate chain (PEM)
    #[arg(long, default_value = "cert.pem")]
    pub cert: String,

    /// TLS private key (PEM, encrypted PKCS#8)
    #[arg(long, default_value = "key.pem")]
    pub key: String,

    /// Private key passphrase
    #[arg(long, env = "SSL_PASSWORD", hide_env_values = true)]
    pub ssl_password: Option<String>,

    /// Serve the redirect over plain HTTP
    #[arg(long)]
    pub no_tls: bool,

    /// Seconds between checks for the captured code
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Only fetch media newer than this ISO date or interval (e.g., 2025-01-02 or 20d)
    #[arg(long)]
    pub since: Option<String>,

    /// Instagram media ID to skip (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Category added to every post (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Hashtag published as a category instead of a tag (repeatable)
    #[arg(long = "category-hashtag")]
    pub category_hashtags: Vec<String>,

    /// WordPress author search string
    #[arg(long)]
    pub author: Option<String>,

    /// Directory for downloaded images
    #[arg(long, default_value = "~/.instagram-to-wordpress/staging")]
    pub staging_dir: String,

    /// Log what would be published without touching WordPress
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    #[command(flatten)]
    pub wordpress: WordPressArgs,
}

#[derive(Args, Debug)]
pub struct WordPressArgs {
    #[arg(long, env = "WORDPRESS_CLIENT_ID", hide = true)]
    pub wordpress_client_id: Option<String>,

    #[arg(long, env = "WORDPRESS_CLIENT_SECRET", hide = true)]
    pub wordpress_client_secret: Option<String>,

    #[arg(long, env = "WORDPRESS_USERNAME", hide = true)]
    pub wordpress_username: Option<String>,

    #[arg(long, env = "WORDPRESS_APPLICATION_PASSWORD", hide = true)]
    pub wordpress_application_password: Option<String>,

    /// WordPress.com site (e.g., example.wordpress.com)
    #[arg(long, env = "WORDPRESS_SITE")]
    pub wordpress_site: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["instagram-to-wordpress", "status"]);
        assert_eq!(cli.log_level, LogLevel::Info);
        assert_eq!(cli.credentials, "~/.instagram-to-wordpress/credentials.json");
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "instagram-to-wordpress",
            "status",
            "--log-level",
            "debug",
            "--credentials",
            "/tmp/creds.json",
        ]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.credentials, "/tmp/creds.json");
    }

    #[test]
    fn test_migrate_repeatable_flags() {
        let cli = parse(&[
            "instagram-to-wordpress",
            "migrate",
            "--exclude",
            "1",
            "--exclude",
            "2",
            "--category",
            "Instagram",
            "--category-hashtag",
            "travel",
            "--dry-run",
        ]);
        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.exclude, vec!["1", "2"]);
        assert_eq!(args.categories, vec!["Instagram"]);
        assert_eq!(args.category_hashtags, vec!["travel"]);
        assert!(args.dry_run);
        assert!(!args.no_progress_bar);
    }

    #[test]
    fn test_authorize_defaults() {
        let cli = parse(&["instagram-to-wordpress", "authorize"]);
        let Command::Authorize(args) = cli.command else {
            panic!("expected authorize");
        };
        assert_eq!(args.port, 8000);
        assert_eq!(args.redirect_uri, "https://localhost:8000/");
        assert_eq!(args.scope, "user_profile,user_media");
        assert!(!args.no_tls);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["instagram-to-wordpress"]).is_err());
    }
}
