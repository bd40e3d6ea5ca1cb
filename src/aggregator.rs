//! Multi-platform aggregation.
//!
//! Fans the connected platforms' first pages out concurrently, merges the
//! Reddit page against the persisted list (stable `saved_at`, new-first
//! ordering), dedupes the combined feed by URL, and resolves local tags on
//! everything returned. One `load_all`/`load_more` runs at a time; all
//! merging happens in memory followed by a single write per storage key.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::fetchers::{FetchError, SavedFeed};
use crate::model::{Post, Source};
use crate::store::{self, keys, KvStore, StoreError};
use crate::tags::TagRegistry;

/// Outstanding continuation tokens, one per platform.
pub type Cursors = BTreeMap<Source, String>;

/// Result of a load operation.
///
/// For `load_all`, `posts` is the full merged feed; for `load_more`, only
/// the incrementally new posts (for appending).
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub posts: Vec<Post>,
    pub cursors: Cursors,
    /// Per-platform failures; a failed platform never aborts the others.
    pub errors: BTreeMap<Source, FetchError>,
}

impl LoadOutcome {
    /// One user-facing cause when a platform needs (re)connecting.
    #[must_use]
    pub fn connect_prompt(&self) -> Option<String> {
        self.errors
            .iter()
            .find_map(|(source, error)| error.connect_prompt(*source))
    }
}

pub struct Aggregator {
    store: Arc<dyn KvStore>,
    tags: TagRegistry,
    feeds: Vec<Box<dyn SavedFeed>>,
    /// Serializes load operations; overlapping callers queue here.
    op_lock: tokio::sync::Mutex<()>,
    loads_completed: AtomicU64,
    last_snapshot: std::sync::Mutex<Option<LoadOutcome>>,
}

impl Aggregator {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, feeds: Vec<Box<dyn SavedFeed>>) -> Self {
        Self {
            tags: TagRegistry::new(Arc::clone(&store)),
            store,
            feeds,
            op_lock: tokio::sync::Mutex::new(()),
            loads_completed: AtomicU64::new(0),
            last_snapshot: std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    /// Fetch every platform's first page, merge, persist, and return the
    /// full feed.
    ///
    /// A call that queued behind another `load_all` returns that load's
    /// snapshot instead of refetching.
    ///
    /// # Errors
    ///
    /// Returns an error only on a storage fault; per-platform fetch
    /// failures land in [`LoadOutcome::errors`].
    pub async fn load_all(&self) -> Result<LoadOutcome, StoreError> {
        let entered = self.loads_completed.load(Ordering::Acquire);
        let _guard = self.op_lock.lock().await;
        if self.loads_completed.load(Ordering::Acquire) != entered {
            let snapshot = self
                .last_snapshot
                .lock()
                .expect("snapshot lock poisoned")
                .clone();
            if let Some(outcome) = snapshot {
                debug!("A load completed while this call waited; reusing its result");
                return Ok(outcome);
            }
        }

        let results = join_all(
            self.feeds
                .iter()
                .map(|feed| async move { (feed.source(), feed.first_page().await) }),
        )
        .await;

        let mut outcome = LoadOutcome::default();
        let mut combined: Vec<Post> = Vec::new();
        for (source, result) in results {
            match result {
                Ok(page) => {
                    if let Some(cursor) = page.cursor.clone() {
                        outcome.cursors.insert(source, cursor);
                    }
                    let posts = if source == Source::Reddit && !page.served_from_cache {
                        self.merge_reddit(page.posts).await?.merged
                    } else {
                        // The X fetcher persists its own snapshot.
                        page.posts
                    };
                    combined.extend(posts);
                }
                Err(error) => {
                    warn!(%source, %error, "Platform fetch failed");
                    outcome.errors.insert(source, error);
                }
            }
        }

        let mut posts = dedupe_by_url(combined);
        self.tags.annotate(&mut posts).await?;
        outcome.posts = posts;

        *self
            .last_snapshot
            .lock()
            .expect("snapshot lock poisoned") = Some(outcome.clone());
        self.loads_completed.fetch_add(1, Ordering::Release);
        info!(
            posts = outcome.posts.len(),
            errors = outcome.errors.len(),
            "Load complete"
        );
        Ok(outcome)
    }

    /// Fetch one additional page per platform with an outstanding cursor
    /// and return only the incrementally new posts. With no outstanding
    /// cursors this is a no-op returning an empty outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only on a storage fault.
    pub async fn load_more(&self, cursors: &Cursors) -> Result<LoadOutcome, StoreError> {
        let _guard = self.op_lock.lock().await;
        if cursors.is_empty() {
            return Ok(LoadOutcome::default());
        }

        let results = join_all(self.feeds.iter().filter_map(|feed| {
            let cursor = cursors.get(&feed.source())?.clone();
            Some(async move { (feed.source(), feed.next_page(&cursor).await) })
        }))
        .await;

        let mut outcome = LoadOutcome::default();
        let mut new_posts: Vec<Post> = Vec::new();
        for (source, result) in results {
            match result {
                Ok(page) => {
                    if let Some(cursor) = page.cursor.clone() {
                        outcome.cursors.insert(source, cursor);
                    }
                    let fresh = if source == Source::Reddit {
                        self.merge_reddit(page.posts).await?.fresh
                    } else {
                        page.posts
                    };
                    new_posts.extend(fresh);
                }
                Err(error) => {
                    warn!(%source, %error, "Platform pagination failed");
                    outcome.errors.insert(source, error);
                }
            }
        }

        let mut posts = dedupe_by_url(new_posts);
        self.tags.annotate(&mut posts).await?;
        outcome.posts = posts;
        Ok(outcome)
    }

    /// Merge an incoming Reddit page against the persisted list.
    ///
    /// Items new to local storage get `saved_at = now` and go to the front
    /// in page order; previously known items keep their original `saved_at`
    /// and relative order at the back (with refreshed fields). The merged
    /// list is written once.
    async fn merge_reddit(&self, incoming: Vec<Post>) -> Result<RedditMerge, StoreError> {
        let persisted: Vec<Post> =
            store::read_json_lenient(self.store.as_ref(), keys::REDDIT_SAVED_POSTS)
                .await?
                .unwrap_or_default();
        let known_ids: HashSet<String> = persisted.iter().map(|p| p.id.clone()).collect();

        let now = Utc::now();
        let mut fresh: Vec<Post> = Vec::new();
        let mut refreshed: HashMap<String, Post> = HashMap::new();
        for mut post in incoming {
            if known_ids.contains(&post.id) {
                refreshed.insert(post.id.clone(), post);
            } else {
                post.saved_at = now;
                fresh.push(post);
            }
        }

        let mut merged = fresh.clone();
        for existing in persisted {
            if let Some(mut updated) = refreshed.remove(&existing.id) {
                updated.saved_at = existing.saved_at;
                merged.push(updated);
            } else {
                merged.push(existing);
            }
        }

        store::write_json(self.store.as_ref(), keys::REDDIT_SAVED_POSTS, &merged).await?;
        debug!(total = merged.len(), new = fresh.len(), "Reddit merge persisted");
        Ok(RedditMerge { merged, fresh })
    }
}

struct RedditMerge {
    merged: Vec<Post>,
    fresh: Vec<Post>,
}

/// Drop repeated URLs, keeping the first-seen copy.
fn dedupe_by_url(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|post| seen.insert(post.url.clone()))
        .collect()
}
