//! Caption → post text, categories and tags.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// `#` followed by Unicode word characters.
static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").expect("valid regex"));

const TITLE_MAX_CHARS: usize = 80;

/// Hashtags in order of first appearance, without the `#`, de-duplicated
/// case-insensitively (first spelling wins).
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG
        .captures_iter(caption)
        .map(|caps| caps[1].to_string())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .collect()
}

/// Turn a hashtag or flag value into a term name: drop `#`, `_` becomes a
/// space, whitespace collapsed.
pub fn normalize_name(raw: &str) -> String {
    raw.trim_start_matches('#')
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Categories and tags for one post.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

/// Split hashtags into categories and tags.
///
/// `fixed_categories` always come first. Hashtags whose normalized name is in
/// `category_hashtags` become categories; the rest become tags. Names are
/// unique case-insensitively across both lists.
pub fn classify(
    hashtags: &[String],
    category_hashtags: &[String],
    fixed_categories: &[String],
) -> Taxonomy {
    let promoted: HashSet<String> = category_hashtags
        .iter()
        .map(|h| normalize_name(h).to_lowercase())
        .collect();

    let mut seen = HashSet::new();
    let mut taxonomy = Taxonomy::default();

    for name in fixed_categories.iter().map(|c| normalize_name(c)) {
        if !name.is_empty() && seen.insert(name.to_lowercase()) {
            taxonomy.categories.push(name);
        }
    }
    for name in hashtags.iter().map(|h| normalize_name(h)) {
        let key = name.to_lowercase();
        if name.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        if promoted.contains(&key) {
            taxonomy.categories.push(name);
        } else {
            taxonomy.tags.push(name);
        }
    }
    taxonomy
}

/// Caption lines with hashtags removed and inner whitespace collapsed.
fn clean_lines(caption: &str) -> Vec<String> {
    let stripped = HASHTAG.replace_all(caption, "");
    stripped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// First non-empty caption line, shortened to 80 characters with `…`.
pub fn title(caption: &str, date: DateTime<Utc>) -> String {
    let Some(line) = clean_lines(caption).into_iter().find(|l| !l.is_empty()) else {
        return format!("Instagram post from {}", date.format("%Y-%m-%d"));
    };
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line;
    }
    let mut short: String = line.chars().take(TITLE_MAX_CHARS - 1).collect();
    short.truncate(short.trim_end().len());
    short.push('…');
    short
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// HTML body: caption paragraphs (blank-line separated) with `<br />` line
/// breaks, then a link back to the Instagram post.
pub fn render_content(caption: &str, permalink: &str) -> String {
    let mut paragraphs: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in clean_lines(caption) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(escape_html(&line));
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let mut html: Vec<String> = paragraphs
        .into_iter()
        .map(|lines| format!("<p>{}</p>", lines.join("<br />\n")))
        .collect();
    if !permalink.is_empty() {
        html.push(format!(
            "<p><a href=\"{}\">View on Instagram</a></p>",
            escape_html(permalink)
        ));
    }
    html.join("\n\n")
}
