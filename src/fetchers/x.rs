//! X (Twitter) bookmarks fetcher.
//!
//! Same three-phase shape as Reddit (token, identity, page) with two extra
//! policies: a fetch cooldown (after a successful fetch, later calls serve
//! the persisted snapshot instead of touching the network for three hours)
//! and a reconnect lockout handled in `auth`. Successful pages merge into
//! the `x_bookmarks_storage` map, which doubles as the offline fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{FetchError, FetchedPage, SavedFeed};
use crate::auth;
use crate::config::Config;
use crate::model::{truncate_chars, Post, Source, CAPTION_MAX_CHARS};
use crate::store::{self, keys, KvStore};

/// Title truncation for tweets; shorter than the caption bound.
const TITLE_MAX_CHARS: usize = 100;

pub struct XFetcher {
    store: Arc<dyn KvStore>,
    client: reqwest::Client,
    config: Config,
    /// Authenticated numeric user id, resolved once per instance.
    user_id: tokio::sync::Mutex<Option<String>>,
}

impl XFetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: Config, store: Arc<dyn KvStore>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            store,
            client,
            config,
            user_id: tokio::sync::Mutex::new(None),
        })
    }

    /// Token phase. X tokens are not refreshed here: an expired token
    /// surfaces as `NoAuth` so the caller prompts a reconnect.
    async fn access_token(&self) -> Result<String, FetchError> {
        let Some(creds) = auth::load_x_credentials(self.store.as_ref()).await? else {
            return Err(FetchError::NoAuth);
        };
        if creds.is_expired(Utc::now()) {
            debug!("X token expired");
            return Err(FetchError::NoAuth);
        }
        Ok(creds.access_token)
    }

    /// Identity phase: the authenticated user id, cached per instance.
    async fn user_id(&self, token: &str) -> Result<String, FetchError> {
        let mut cached = self.user_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let url = format!("{}/2/users/me", self.config.x_api_base);
        let response = self.client.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.as_u16() == 401 {
            auth::purge_x_credentials(self.store.as_ref()).await?;
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "identity endpoint returned {status}"
            )));
        }

        let identity: IdentityResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        let Some(id) = identity.data.map(|d| d.id) else {
            return Err(FetchError::Parse("identity response carried no id".to_string()));
        };
        debug!(user_id = %id, "Resolved X identity");
        *cached = Some(id.clone());
        Ok(id)
    }

    /// Page phase: one page of the bookmarks listing.
    async fn fetch_bookmarks(
        &self,
        token: &str,
        user_id: &str,
        cursor: Option<&str>,
    ) -> Result<BookmarksResponse, FetchError> {
        let mut url = Url::parse(&format!(
            "{}/2/users/{}/bookmarks",
            self.config.x_api_base, user_id
        ))
        .map_err(|e| FetchError::Parse(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("max_results", &self.config.page_size.to_string());
            query.append_pair(
                "tweet.fields",
                "created_at,text,attachments,author_id,entities",
            );
            query.append_pair("expansions", "attachments.media_keys,author_id");
            query.append_pair("media.fields", "url,preview_image_url,type");
            query.append_pair("user.fields", "username");
            if let Some(pagination_token) = cursor {
                query.append_pair("pagination_token", pagination_token);
            }
        }

        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.as_u16() == 401 {
            // Reported distinctly from "no bookmarks" so the caller can
            // prompt a reconnect rather than fall back to the cache.
            auth::purge_x_credentials(self.store.as_ref()).await?;
            return Err(FetchError::Unauthorized);
        }
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "bookmarks endpoint returned {status}"
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn in_cooldown(&self, now: DateTime<Utc>) -> Result<bool, FetchError> {
        let Some(last_fetched) = self
            .store
            .get(keys::X_CACHE_TIME)
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
        else {
            return Ok(false);
        };
        let cooldown_millis =
            i64::try_from(self.config.x_fetch_cooldown.as_millis()).unwrap_or(i64::MAX);
        Ok(now.timestamp_millis() - last_fetched < cooldown_millis)
    }

    async fn cache_map(&self) -> Result<HashMap<String, Post>, FetchError> {
        Ok(
            store::read_json_lenient(self.store.as_ref(), keys::X_BOOKMARKS_STORAGE)
                .await?
                .unwrap_or_default(),
        )
    }

    /// The persisted snapshot, newest first.
    async fn cached_snapshot(&self) -> Result<Vec<Post>, FetchError> {
        Ok(ordered_snapshot(self.cache_map().await?))
    }

    /// Merge freshly parsed tweets into the persisted map. Known entries
    /// keep their first-seen `saved_at` and tags; returns the full ordered
    /// snapshot plus the genuinely new posts.
    async fn merge_into_cache(
        &self,
        incoming: Vec<Post>,
    ) -> Result<(Vec<Post>, Vec<Post>), FetchError> {
        let mut map = self.cache_map().await?;
        let mut fresh = Vec::new();

        for post in incoming {
            if let Some(existing) = map.get(&post.id) {
                let mut updated = post;
                updated.saved_at = existing.saved_at;
                updated.tags = existing.tags.clone();
                map.insert(updated.id.clone(), updated);
            } else {
                fresh.push(post.clone());
                map.insert(post.id.clone(), post);
            }
        }

        store::write_json(self.store.as_ref(), keys::X_BOOKMARKS_STORAGE, &map).await?;
        Ok((ordered_snapshot(map), fresh))
    }

    async fn stamp_cache_time(&self, now: DateTime<Utc>) -> Result<(), FetchError> {
        self.store
            .set(keys::X_CACHE_TIME, &now.timestamp_millis().to_string())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SavedFeed for XFetcher {
    fn source(&self) -> Source {
        Source::X
    }

    async fn first_page(&self) -> Result<FetchedPage, FetchError> {
        let token = self.access_token().await?;

        let now = Utc::now();
        if self.in_cooldown(now).await? {
            debug!("X fetch cooldown active, serving persisted snapshot");
            return Ok(FetchedPage {
                posts: self.cached_snapshot().await?,
                cursor: None,
                served_from_cache: true,
            });
        }

        let user_id = self.user_id(&token).await?;
        let response = self.fetch_bookmarks(&token, &user_id, None).await?;

        let Some(tweets) = response.data else {
            // No bookmarks in the response: fall back to whatever was
            // persisted rather than presenting an empty feed.
            debug!("X bookmarks response empty, serving persisted snapshot");
            return Ok(FetchedPage {
                posts: self.cached_snapshot().await?,
                cursor: None,
                served_from_cache: true,
            });
        };

        let cursor = response.meta.as_ref().and_then(|m| m.next_token.clone());
        let parsed = parse_bookmarks(tweets, response.includes, now);
        let (snapshot, fresh) = self.merge_into_cache(parsed).await?;
        self.stamp_cache_time(now).await?;
        info!(total = snapshot.len(), new = fresh.len(), "X bookmarks fetched");

        Ok(FetchedPage {
            posts: snapshot,
            cursor,
            served_from_cache: false,
        })
    }

    async fn next_page(&self, cursor: &str) -> Result<FetchedPage, FetchError> {
        let token = self.access_token().await?;
        let now = Utc::now();
        let user_id = self.user_id(&token).await?;
        let response = self.fetch_bookmarks(&token, &user_id, Some(cursor)).await?;

        let Some(tweets) = response.data else {
            return Ok(FetchedPage::default());
        };

        let next_cursor = response.meta.as_ref().and_then(|m| m.next_token.clone());
        let parsed = parse_bookmarks(tweets, response.includes, now);
        let (_, fresh) = self.merge_into_cache(parsed).await?;
        self.stamp_cache_time(now).await?;

        Ok(FetchedPage {
            posts: fresh,
            cursor: next_cursor,
            served_from_cache: false,
        })
    }
}

// ---- Raw API shapes ----

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    data: Option<IdentityData>,
}

#[derive(Debug, Deserialize)]
struct IdentityData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BookmarksResponse {
    #[serde(default)]
    data: Option<Vec<RawTweet>>,
    #[serde(default)]
    includes: Option<RawIncludes>,
    #[serde(default)]
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Option<RawAttachments>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttachments {
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIncludes {
    media: Vec<RawMedia>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMedia {
    media_key: String,
    #[serde(rename = "type")]
    kind: String,
    url: Option<String>,
    preview_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMeta {
    next_token: Option<String>,
}

// ---- Normalization ----

/// Resolve each tweet's media keys against the response's media side-table
/// and normalize into [`Post`] records.
fn parse_bookmarks(
    tweets: Vec<RawTweet>,
    includes: Option<RawIncludes>,
    now: DateTime<Utc>,
) -> Vec<Post> {
    let media_map: HashMap<&str, &RawMedia> = includes
        .as_ref()
        .map(|inc| {
            inc.media
                .iter()
                .map(|m| (m.media_key.as_str(), m))
                .collect()
        })
        .unwrap_or_default();

    tweets
        .into_iter()
        .map(|tweet| normalize_tweet(tweet, &media_map, now))
        .collect()
}

fn normalize_tweet(
    tweet: RawTweet,
    media_map: &HashMap<&str, &RawMedia>,
    now: DateTime<Utc>,
) -> Post {
    let attached: Vec<&RawMedia> = tweet
        .attachments
        .as_ref()
        .map(|a| {
            a.media_keys
                .iter()
                .filter_map(|key| media_map.get(key.as_str()).copied())
                .collect()
        })
        .unwrap_or_default();

    let video_media = attached
        .iter()
        .find(|m| m.kind == "video" || m.kind == "animated_gif");

    let (images, video, is_gif_variant) = match video_media {
        Some(media) => (
            Vec::new(),
            media.preview_image_url.clone(),
            media.kind == "animated_gif",
        ),
        None => (
            attached
                .iter()
                .filter(|m| m.kind == "photo")
                .filter_map(|m| m.url.clone())
                .collect(),
            None,
            false,
        ),
    };

    let title = if tweet.text.is_empty() {
        "Untitled".to_string()
    } else {
        truncate_chars(&tweet.text, TITLE_MAX_CHARS)
    };
    let caption = if tweet.text.is_empty() {
        "No description.".to_string()
    } else {
        truncate_chars(&tweet.text, CAPTION_MAX_CHARS)
    };

    Post {
        url: format!("https://x.com/i/web/status/{}", tweet.id),
        id: tweet.id,
        source: Source::X,
        title,
        caption,
        images,
        video,
        is_gif_variant,
        tags: vec!["twitter".to_string()],
        local_tags: Vec::new(),
        saved_at: now,
    }
}

/// Order the persisted map newest first. Ties (same merge batch) break on
/// the numeric tweet id, newest id first.
fn ordered_snapshot(map: HashMap<String, Post>) -> Vec<Post> {
    let mut posts: Vec<Post> = map.into_values().collect();
    posts.sort_by(|a, b| {
        b.saved_at
            .cmp(&a.saved_at)
            .then_with(|| numeric_id(&b.id).cmp(&numeric_id(&a.id)))
            .then_with(|| b.id.cmp(&a.id))
    });
    posts
}

fn numeric_id(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}
