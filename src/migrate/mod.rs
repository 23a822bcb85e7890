//! Instagram → WordPress migration loop.
//!
//! Strictly sequential: for each pending item, oldest first, download its
//! images into a per-item staging directory, publish, remove the staging
//! directory, then advance the watermark to the item's timestamp. A crash
//! between publish and watermark can at worst republish one post.

pub mod caption;

use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::instagram::{InstagramClient, InstagramError, MediaItem, MediaQuery};
use crate::wordpress::{NewPost, WordPressClient, WordPressError};

/// Where finished posts go.
#[async_trait]
pub trait Publisher: Send {
    /// Publish `post` and return its remote id.
    async fn publish(&mut self, post: &NewPost) -> Result<u64, WordPressError>;
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn publish(&mut self, post: &NewPost) -> Result<u64, WordPressError> {
        self.create_post(post).await
    }
}

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Overrides the stored watermark as the lower bound of the fetch window.
    pub since: Option<DateTime<Utc>>,
    pub excluded_ids: HashSet<String>,
    pub categories: Vec<String>,
    pub category_hashtags: Vec<String>,
    pub author: Option<String>,
    pub staging_dir: PathBuf,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub published: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

/// Fetch the window and keep what still needs publishing.
pub async fn select_media(
    instagram: &mut InstagramClient,
    options: &MigrateOptions,
) -> Result<Vec<MediaItem>, InstagramError> {
    let watermark = instagram.credential().watermark();
    let query = MediaQuery {
        since: options.since.or(watermark),
        until: Some(Utc::now()),
        include_children: true,
        excluded_ids: options.excluded_ids.clone(),
    };
    tracing::info!(
        since = ?query.since,
        watermark = ?watermark,
        "Fetching Instagram media"
    );
    let items = instagram.list_media(&query).await?;
    Ok(pending_items(items, watermark))
}

/// Items strictly newer than `watermark`, oldest first. Items without a
/// timestamp cannot be ordered against the watermark and are dropped.
fn pending_items(items: Vec<MediaItem>, watermark: Option<DateTime<Utc>>) -> Vec<MediaItem> {
    let mut pending: Vec<MediaItem> = items
        .into_iter()
        .filter(|item| match item.timestamp {
            None => {
                tracing::warn!(id = %item.id, "Skipping media without timestamp");
                false
            }
            Some(ts) => watermark.map_or(true, |w| ts > w),
        })
        .collect();
    pending.sort_by_key(|item| item.timestamp);
    pending
}

fn build_post(
    item: &MediaItem,
    date: DateTime<Utc>,
    media_paths: Vec<PathBuf>,
    options: &MigrateOptions,
) -> NewPost {
    let hashtags = caption::extract_hashtags(&item.caption);
    let taxonomy = caption::classify(&hashtags, &options.category_hashtags, &options.categories);
    NewPost {
        title: caption::title(&item.caption, date),
        content: caption::render_content(&item.caption, &item.permalink),
        date,
        categories: taxonomy.categories,
        tags: taxonomy.tags,
        author: options.author.clone(),
        media_paths,
    }
}

/// Log what a real run would publish. Touches nothing.
pub fn report_dry_run(items: &[MediaItem], options: &MigrateOptions) {
    for item in items {
        let Some(date) = item.timestamp else {
            continue;
        };
        let post = build_post(item, date, Vec::new(), options);
        tracing::info!(
            id = %item.id,
            username = %item.username,
            images = item.image_urls().len(),
            categories = ?post.categories,
            tags = ?post.tags,
            "[DRY RUN] Would publish '{}' dated {}",
            post.title,
            date
        );
    }
    tracing::info!("[DRY RUN] {} post(s) would be published", items.len());
}

/// `{id}_{index}.{ext}`, taking the extension from the URL path.
fn file_name_for(media_id: &str, index: usize, url: &str) -> String {
    let ext = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|last| {
            Path::new(&last)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{media_id}_{index}.{ext}")
}

/// Progress bar over the pending items, hidden when disabled or not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb
}

async fn remove_staging(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove staging directory {}: {}", dir.display(), e);
        }
    }
}

/// Publish `items` in order, stopping between items once `shutdown` fires.
pub async fn publish_all<P: Publisher>(
    instagram: &mut InstagramClient,
    publisher: &mut P,
    items: &[MediaItem],
    options: &MigrateOptions,
    shutdown: &CancellationToken,
) -> anyhow::Result<MigrationSummary> {
    let mut summary = MigrationSummary::default();
    let pb = create_progress_bar(options.no_progress_bar, items.len() as u64);

    for item in items {
        if shutdown.is_cancelled() {
            pb.suspend(|| tracing::info!("Shutdown requested, stopping migration"));
            summary.interrupted = true;
            break;
        }
        pb.set_message(item.id.clone());
        match publish_item(instagram, publisher, item, options, &pb).await? {
            Some(_) => summary.published += 1,
            None => summary.skipped += 1,
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(summary)
}

/// Returns the new post id, or `None` if the item was skipped.
async fn publish_item<P: Publisher>(
    instagram: &mut InstagramClient,
    publisher: &mut P,
    item: &MediaItem,
    options: &MigrateOptions,
    pb: &ProgressBar,
) -> anyhow::Result<Option<u64>> {
    let Some(date) = item.timestamp else {
        return Ok(None);
    };

    let staging = options.staging_dir.join(&item.id);
    tokio::fs::create_dir_all(&staging)
        .await
        .with_context(|| format!("Failed to create staging directory {}", staging.display()))?;

    let mut media_paths = Vec::new();
    for (index, url) in item.image_urls().into_iter().enumerate() {
        let destination = staging.join(file_name_for(&item.id, index, url));
        match instagram.download_media(url, &destination).await {
            Ok(Some(path)) => media_paths.push(path),
            Ok(None) => {}
            Err(InstagramError::Http(e)) => {
                pb.suspend(|| tracing::warn!(id = %item.id, "Download failed, skipping image: {}", e));
            }
            Err(e) => {
                remove_staging(&staging).await;
                return Err(e).context(format!("Failed to download media for {}", item.id));
            }
        }
    }

    if media_paths.is_empty() {
        pb.suspend(|| tracing::warn!(id = %item.id, "No images downloaded, skipping post"));
        remove_staging(&staging).await;
        return Ok(None);
    }

    let post = build_post(item, date, media_paths, options);
    let published = publisher.publish(&post).await;
    remove_staging(&staging).await;
    let post_id =
        published.with_context(|| format!("Failed to publish Instagram media {}", item.id))?;

    instagram
        .advance_watermark(date)
        .await
        .with_context(|| format!("Failed to record watermark for {}", item.id))?;
    pb.suspend(|| {
        tracing::info!(id = %item.id, post_id, "Migrated '{}'", post.title);
    });
    Ok(Some(post_id))
}
