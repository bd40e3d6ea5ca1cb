use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform a saved item originated from.
///
/// Only `Reddit` and `X` are ever produced by a fetcher; the remaining
/// variants exist for the connect-account surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Reddit,
    X,
    Instagram,
    Youtube,
}

impl Source {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::X => "x",
            Self::Instagram => "instagram",
            Self::Youtube => "youtube",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reddit" => Some(Self::Reddit),
            "x" => Some(Self::X),
            "instagram" => Some(Self::Instagram),
            "youtube" => Some(Self::Youtube),
            _ => None,
        }
    }

    /// Display name used in user-facing connect prompts.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Reddit => "Reddit",
            Self::X => "X",
            Self::Instagram => "Instagram",
            Self::Youtube => "YouTube",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized saved item from any platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Platform-qualified unique id (Reddit fullname, tweet id).
    pub id: String,
    pub source: Source,
    pub title: String,
    pub caption: String,
    /// Ordered image URLs; galleries contribute several, video posts none.
    #[serde(default)]
    pub images: Vec<String>,
    /// Single video URL, mutually exclusive with `images`.
    #[serde(default)]
    pub video: Option<String>,
    /// True when the "video" is a silent looping clip rather than a
    /// playable video with controls.
    #[serde(default)]
    pub is_gif_variant: bool,
    /// Remote-origin tags (platform name, subreddit), fixed at parse time.
    #[serde(default)]
    pub tags: Vec<String>,
    /// User-assigned tags, resolved at read time from the tag registry.
    /// Never persisted with the post record.
    #[serde(skip)]
    pub local_tags: Vec<String>,
    /// Canonical permalink; the cross-platform dedup key.
    pub url: String,
    /// Set the first time the post is persisted locally; never overwritten
    /// on later merges.
    pub saved_at: DateTime<Utc>,
}

impl Post {
    /// Stable key used for tag assignment.
    ///
    /// The platform-qualified id is stable across refetches; two distinct
    /// posts that happen to share a title never collide.
    #[must_use]
    pub fn bookmark_key(&self) -> String {
        format!("{}-{}", self.source, self.id)
    }
}

/// Maximum caption length applied at parse time.
pub const CAPTION_MAX_CHARS: usize = 150;

/// Truncate to at most `max` characters, respecting char boundaries.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
