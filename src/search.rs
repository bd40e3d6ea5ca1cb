//! Free-text filtering over the in-memory merged feed.
//!
//! Pure and side-effect-free: the tag registry is consulted upstream when
//! `local_tags` is resolved; filtering itself only reads the post list.

use serde::{Deserialize, Serialize};

use crate::model::Post;

/// Which field(s) the query matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    All,
    Title,
    Caption,
    Tags,
}

impl SearchField {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Title => "title",
            Self::Caption => "caption",
            Self::Tags => "tags",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "title" => Some(Self::Title),
            "caption" => Some(Self::Caption),
            "tags" => Some(Self::Tags),
            _ => None,
        }
    }
}

/// Posts whose selected field(s) contain the trimmed, case-folded query as
/// a substring. An empty or whitespace-only query returns the input
/// unfiltered.
#[must_use]
pub fn filter_posts<'a>(posts: &'a [Post], query: &str, field: SearchField) -> Vec<&'a Post> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return posts.iter().collect();
    }
    posts
        .iter()
        .filter(|post| matches(post, &needle, field))
        .collect()
}

fn matches(post: &Post, needle: &str, field: SearchField) -> bool {
    match field {
        SearchField::Title => post.title.to_lowercase().contains(needle),
        SearchField::Caption => post.caption.to_lowercase().contains(needle),
        SearchField::Tags => tag_matches(post, needle),
        SearchField::All => {
            post.title.to_lowercase().contains(needle)
                || post.caption.to_lowercase().contains(needle)
                || tag_matches(post, needle)
        }
    }
}

/// Matches against the union of remote tags and locally-assigned tags.
fn tag_matches(post: &Post, needle: &str) -> bool {
    post.tags
        .iter()
        .chain(post.local_tags.iter())
        .any(|tag| tag.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use chrono::Utc;

    fn post(id: &str, title: &str, caption: &str, tags: &[&str], local: &[&str]) -> Post {
        Post {
            id: id.to_string(),
            source: Source::Reddit,
            title: title.to_string(),
            caption: caption.to_string(),
            images: Vec::new(),
            video: None,
            is_gif_variant: false,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            local_tags: local.iter().map(|t| (*t).to_string()).collect(),
            url: format!("https://example.com/{id}"),
            saved_at: Utc::now(),
        }
    }

    fn sample() -> Vec<Post> {
        vec![
            post("1", "Rust ownership explained", "A walkthrough", &["reddit", "rust"], &[]),
            post("2", "Sourdough starter", "Day three bubbles", &["reddit", "breadit"], &["cooking"]),
            post("3", "Weekend ride", "Rusty chain fix", &["twitter"], &[]),
        ]
    }

    #[test]
    fn test_empty_query_returns_all() {
        let posts = sample();
        assert_eq!(filter_posts(&posts, "", SearchField::All).len(), 3);
        assert_eq!(filter_posts(&posts, "   ", SearchField::Title).len(), 3);
    }

    #[test]
    fn test_title_match_is_case_folded() {
        let posts = sample();
        let hits = filter_posts(&posts, "RUST", SearchField::Title);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[test]
    fn test_caption_match() {
        let posts = sample();
        let hits = filter_posts(&posts, "rusty", SearchField::Caption);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[test]
    fn test_all_searches_every_field() {
        let posts = sample();
        let hits = filter_posts(&posts, "rust", SearchField::All);
        // Title of 1, remote tag of 1, caption of 3
        let ids: Vec<&str> = hits.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_tags_field_includes_local_tags() {
        let posts = sample();
        let hits = filter_posts(&posts, "cooking", SearchField::Tags);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");

        // Remote tags still match
        let hits = filter_posts(&posts, "breadit", SearchField::Tags);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_query_is_trimmed() {
        let posts = sample();
        let hits = filter_posts(&posts, "  sourdough  ", SearchField::Title);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_idempotent_and_order_preserving() {
        let posts = sample();
        let first = filter_posts(&posts, "reddit", SearchField::Tags);
        let second = filter_posts(&posts, "reddit", SearchField::Tags);
        let first_ids: Vec<&str> = first.iter().map(|p| p.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(first_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_field_round_trip() {
        for field in [SearchField::All, SearchField::Title, SearchField::Caption, SearchField::Tags] {
            assert_eq!(SearchField::from_str(field.as_str()), Some(field));
        }
        assert_eq!(SearchField::from_str("author"), None);
    }
}
