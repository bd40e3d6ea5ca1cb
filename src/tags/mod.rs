//! User-defined tags and their bookmark assignments.
//!
//! Two persisted structures: a global registry (`user_tags`, ordered
//! most-recent-first) and a per-bookmark assignment map
//! (`bookmark_tag_map`). The registry is the only writer of both keys.
//!
//! Validation failures (too short, duplicate) are `Ok(false)`; only store
//! faults are errors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::model::Post;
use crate::store::{self, keys, KvStore, StoreError};

/// Minimum tag length after trimming.
const MIN_TAG_CHARS: usize = 3;

/// A registry tag with its assignment count across all bookmarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

#[derive(Clone)]
pub struct TagRegistry {
    store: Arc<dyn KvStore>,
}

impl TagRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// All global tags, most-recent-first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        Ok(
            store::read_json_lenient(self.store.as_ref(), keys::USER_TAGS)
                .await?
                .unwrap_or_default(),
        )
    }

    /// Add a tag to the global registry.
    ///
    /// Returns `false` when the trimmed name is under three characters or
    /// normalizes to an existing tag; on success the tag is prepended.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn add_tag(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.trim();
        if name.chars().count() < MIN_TAG_CHARS {
            return Ok(false);
        }

        let mut tags = self.list_tags().await?;
        if tags.iter().any(|t| normalize(t) == normalize(name)) {
            return Ok(false);
        }

        tags.insert(0, name.to_string());
        store::write_json(self.store.as_ref(), keys::USER_TAGS, &tags).await?;
        debug!(tag = name, "Added global tag");
        Ok(true)
    }

    /// Rename a registry tag in place, preserving its position, and rewrite
    /// every occurrence in every bookmark's assignment list.
    ///
    /// Returns `false` when `old` is not registered, or when the trimmed
    /// new name is too short or collides with a tag other than `old`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn rename_tag(&self, old: &str, new: &str) -> Result<bool, StoreError> {
        let new = new.trim();
        if new.chars().count() < MIN_TAG_CHARS {
            return Ok(false);
        }

        let mut tags = self.list_tags().await?;
        if !tags.iter().any(|t| t == old) {
            return Ok(false);
        }
        if tags
            .iter()
            .filter(|t| t.as_str() != old)
            .any(|t| normalize(t) == normalize(new))
        {
            return Ok(false);
        }

        for tag in &mut tags {
            if tag == old {
                *tag = new.to_string();
            }
        }
        store::write_json(self.store.as_ref(), keys::USER_TAGS, &tags).await?;

        let mut map = self.assignment_map().await?;
        for assigned in map.values_mut() {
            for tag in assigned.iter_mut() {
                if tag == old {
                    *tag = new.to_string();
                }
            }
        }
        store::write_json(self.store.as_ref(), keys::BOOKMARK_TAG_MAP, &map).await?;
        debug!(old, new, "Renamed tag");
        Ok(true)
    }

    /// Delete a tag from the registry and strip it from every bookmark's
    /// assignment list. Deleting an absent tag is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn delete_tag(&self, name: &str) -> Result<(), StoreError> {
        let mut tags = self.list_tags().await?;
        tags.retain(|t| t != name);
        store::write_json(self.store.as_ref(), keys::USER_TAGS, &tags).await?;

        let mut map = self.assignment_map().await?;
        for assigned in map.values_mut() {
            assigned.retain(|t| t != name);
        }
        store::write_json(self.store.as_ref(), keys::BOOKMARK_TAG_MAP, &map).await?;
        debug!(tag = name, "Deleted tag");
        Ok(())
    }

    /// Tags assigned to one bookmark, or empty if none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn tags_for_bookmark(&self, bookmark_key: &str) -> Result<Vec<String>, StoreError> {
        let map = self.assignment_map().await?;
        Ok(map.get(bookmark_key).cloned().unwrap_or_default())
    }

    /// Prepend `tag` to a bookmark's list if not already present.
    ///
    /// Does not validate against the global registry: an already-existing
    /// tag may be attached without re-validation. Returns the bookmark's
    /// updated list.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn add_tag_to_bookmark(
        &self,
        bookmark_key: &str,
        tag: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut map = self.assignment_map().await?;
        let assigned = map.entry(bookmark_key.to_string()).or_default();
        if !assigned.iter().any(|t| t == tag) {
            assigned.insert(0, tag.to_string());
        }
        let updated = assigned.clone();
        store::write_json(self.store.as_ref(), keys::BOOKMARK_TAG_MAP, &map).await?;
        Ok(updated)
    }

    /// Remove `tag` from a bookmark's list; no-op when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn remove_tag_from_bookmark(
        &self,
        bookmark_key: &str,
        tag: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.assignment_map().await?;
        if let Some(assigned) = map.get_mut(bookmark_key) {
            assigned.retain(|t| t != tag);
        }
        store::write_json(self.store.as_ref(), keys::BOOKMARK_TAG_MAP, &map).await?;
        Ok(())
    }

    /// Every registry tag with its assignment count, registry order
    /// preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn tags_with_counts(&self) -> Result<Vec<TagCount>, StoreError> {
        let tags = self.list_tags().await?;
        let map = self.assignment_map().await?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for assigned in map.values() {
            for tag in assigned {
                *counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        Ok(tags
            .into_iter()
            .map(|name| {
                let count = counts.get(name.as_str()).copied().unwrap_or(0);
                TagCount { name, count }
            })
            .collect())
    }

    /// Resolve `local_tags` on each post from the assignment map, reading
    /// the map once.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend fails.
    pub async fn annotate(&self, posts: &mut [Post]) -> Result<(), StoreError> {
        let map = self.assignment_map().await?;
        for post in posts {
            post.local_tags = map.get(&post.bookmark_key()).cloned().unwrap_or_default();
        }
        Ok(())
    }

    async fn assignment_map(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        Ok(
            store::read_json_lenient(self.store.as_ref(), keys::BOOKMARK_TAG_MAP)
                .await?
                .unwrap_or_default(),
        )
    }
}

/// Uniqueness normalization: strip all whitespace, lowercase.
///
/// "My Tag" and "mytag" collide, as do "My Tag" and "My  Tag".
fn normalize(tag: &str) -> String {
    tag.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}
