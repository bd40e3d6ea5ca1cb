//! Reddit saved-items fetcher.
//!
//! Three phases per invocation: a valid access token (refreshing through
//! the token endpoint when expired), the authenticated username (resolved
//! once per fetcher instance), then one page of `/user/{name}/saved`.
//!
//! On a freshly-connected account (nothing persisted locally yet) the first
//! fetch pages through the entire listing instead of returning one page.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{FetchError, FetchedPage, SavedFeed};
use crate::auth::{self, AuthError};
use crate::config::Config;
use crate::model::{truncate_chars, Post, Source, CAPTION_MAX_CHARS};
use crate::store::{self, keys, KvStore};

pub struct RedditFetcher {
    store: Arc<dyn KvStore>,
    client: reqwest::Client,
    config: Config,
    /// Authenticated username, resolved once per instance.
    username: tokio::sync::Mutex<Option<String>>,
}

impl RedditFetcher {
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
            username: tokio::sync::Mutex::new(None),
        })
    }

    /// Token phase: return a currently-valid access token, refreshing an
    /// expired one when a refresh token is available.
    async fn access_token(&self) -> Result<String, FetchError> {
        let Some(creds) = auth::load_reddit_credentials(self.store.as_ref()).await? else {
            return Err(FetchError::NoAuth);
        };

        if !creds.is_expired(Utc::now()) {
            return Ok(creds.access_token);
        }

        let Some(refresh_token) = creds.refresh_token else {
            return Err(FetchError::NoAuth);
        };

        match auth::refresh_reddit_token(
            &self.client,
            &self.config,
            self.store.as_ref(),
            &refresh_token,
        )
        .await
        {
            Ok(token) => Ok(token),
            Err(AuthError::Rejected(reason)) => {
                debug!(reason, "Reddit token refresh rejected");
                Err(FetchError::NoAuth)
            }
            Err(AuthError::Http(e)) => Err(FetchError::Network(e)),
            Err(AuthError::Store(e)) => Err(e.into()),
        }
    }

    /// Identity phase: the authenticated username, cached per instance.
    async fn username(&self, token: &str) -> Result<String, FetchError> {
        let mut cached = self.username.lock().await;
        if let Some(name) = cached.as_ref() {
            return Ok(name.clone());
        }

        let url = format!("{}/api/v1/me", self.config.reddit_api_base);
        let response = self.client.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.as_u16() == 401 {
            auth::purge_reddit_credentials(self.store.as_ref()).await?;
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "identity endpoint returned {status}"
            )));
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        debug!(username = %identity.name, "Resolved Reddit identity");
        *cached = Some(identity.name.clone());
        Ok(identity.name)
    }

    /// Page phase: one page of the saved-items listing.
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FetchedPage, FetchError> {
        let token = self.access_token().await?;
        let username = self.username(&token).await?;

        let mut url = Url::parse(&format!(
            "{}/user/{}/saved",
            self.config.reddit_api_base, username
        ))
        .map_err(|e| FetchError::Parse(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("limit", &self.config.page_size.to_string());
        if let Some(after) = cursor {
            url.query_pairs_mut().append_pair("after", after);
        }

        let response = self.client.get(url).bearer_auth(&token).send().await?;

        let status = response.status();
        if status.as_u16() == 401 {
            // The credential is dead; purge so the next attempt is a clean
            // connect prompt instead of a retry loop.
            auth::purge_reddit_credentials(self.store.as_ref()).await?;
            return Err(FetchError::Unauthorized);
        }
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "saved listing returned {status}"
            )));
        }

        let body = response.text().await?;
        let listing: Listing =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

        let posts = parse_saved_items(listing.data.children, Utc::now());
        Ok(FetchedPage {
            posts,
            cursor: listing.data.after,
            served_from_cache: false,
        })
    }

    async fn has_persisted_posts(&self) -> Result<bool, FetchError> {
        let persisted: Option<Vec<Post>> =
            store::read_json_lenient(self.store.as_ref(), keys::REDDIT_SAVED_POSTS).await?;
        Ok(persisted.is_some_and(|posts| !posts.is_empty()))
    }
}

#[async_trait]
impl SavedFeed for RedditFetcher {
    fn source(&self) -> Source {
        Source::Reddit
    }

    async fn first_page(&self) -> Result<FetchedPage, FetchError> {
        if self.has_persisted_posts().await? {
            return self.fetch_page(None).await;
        }

        // Fresh account: bulk-import the whole listing.
        info!("No persisted Reddit posts; importing the full saved listing");
        let mut all_posts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(cursor.as_deref()).await?;
            all_posts.extend(page.posts);
            match page.cursor {
                // Stop if the listing stops advancing.
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
        info!(count = all_posts.len(), "Reddit bulk import complete");
        Ok(FetchedPage {
            posts: all_posts,
            cursor: None,
            served_from_cache: false,
        })
    }

    async fn next_page(&self, cursor: &str) -> Result<FetchedPage, FetchError> {
        self.fetch_page(Some(cursor)).await
    }
}

// ---- Raw API shapes ----

#[derive(Debug, Deserialize)]
struct Identity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<RawThing>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawThing {
    data: RawItem,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawItem {
    name: Option<String>,
    id: Option<String>,
    title: Option<String>,
    link_title: Option<String>,
    selftext: Option<String>,
    body: Option<String>,
    subreddit: Option<String>,
    permalink: Option<String>,
    link_permalink: Option<String>,
    link_url: Option<String>,
    is_video: bool,
    is_gallery: bool,
    media: Option<RawMedia>,
    preview: Option<RawPreview>,
    gallery_data: Option<RawGalleryData>,
    media_metadata: Option<HashMap<String, RawMediaMeta>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMedia {
    reddit_video: Option<RawRedditVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRedditVideo {
    hls_url: Option<String>,
    fallback_url: Option<String>,
    dash_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPreview {
    images: Vec<RawPreviewImage>,
    reddit_video_preview: Option<RawVideoPreview>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPreviewImage {
    source: Option<RawImageSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawImageSource {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideoPreview {
    is_gif: bool,
    fallback_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGalleryData {
    items: Vec<RawGalleryItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGalleryItem {
    media_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMediaMeta {
    s: Option<RawMediaSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMediaSource {
    u: Option<String>,
}

// ---- Normalization ----

/// Normalize raw saved-listing children into [`Post`] records.
///
/// Items without a resolvable id or permalink are dropped: the id is the
/// per-platform identity, the URL is the cross-platform dedup key.
fn parse_saved_items(children: Vec<RawThing>, now: DateTime<Utc>) -> Vec<Post> {
    children
        .into_iter()
        .filter_map(|thing| normalize_item(thing.data, now))
        .collect()
}

fn normalize_item(item: RawItem, now: DateTime<Utc>) -> Option<Post> {
    let Some(id) = item.name.clone().or_else(|| item.id.clone()) else {
        warn!("Dropping saved item without an id");
        return None;
    };
    let Some(url) = permalink(&item) else {
        warn!(id, "Dropping saved item without a permalink");
        return None;
    };

    let (video, is_gif_variant, has_video) = detect_video(&item);
    let images = if has_video {
        Vec::new()
    } else {
        extract_images(&item)
    };

    let subreddit = item.subreddit.clone().unwrap_or_else(|| "unknown".to_string());
    let (title, caption, tags) = synthesize_text(&item, &subreddit);

    Some(Post {
        id,
        source: Source::Reddit,
        title,
        caption,
        images,
        video,
        is_gif_variant,
        tags,
        local_tags: Vec::new(),
        url,
        saved_at: now,
    })
}

/// Three synthesis rules: post (has a title), comment (has a body, no
/// title), unknown (neither).
fn synthesize_text(item: &RawItem, subreddit: &str) -> (String, String, Vec<String>) {
    let reddit_tag = "reddit".to_string();

    if let Some(title) = item.title.clone().or_else(|| item.link_title.clone()) {
        let title = if title.is_empty() {
            "Untitled".to_string()
        } else {
            truncate_chars(&title, CAPTION_MAX_CHARS)
        };
        let caption = match item.selftext.as_deref() {
            Some(text) if !text.is_empty() => truncate_chars(text, CAPTION_MAX_CHARS),
            _ => "No description.".to_string(),
        };
        return (title, caption, vec![reddit_tag, subreddit.to_string()]);
    }

    if let Some(body) = item.body.as_deref() {
        let title = format!("Comment on r/{subreddit}");
        let caption = if body.is_empty() {
            "No comment text.".to_string()
        } else {
            truncate_chars(body, CAPTION_MAX_CHARS)
        };
        return (title, caption, vec![reddit_tag, subreddit.to_string()]);
    }

    (
        "Unknown saved item".to_string(),
        "No description available.".to_string(),
        vec![reddit_tag],
    )
}

/// Returns (video url, gif variant, item carries video media).
///
/// A playable video is native `reddit_video` media; a gif variant is a
/// silent preview clip. Either one suppresses image extraction even when
/// no usable URL was found.
fn detect_video(item: &RawItem) -> (Option<String>, bool, bool) {
    if item.is_video {
        if let Some(video) = item.media.as_ref().and_then(|m| m.reddit_video.as_ref()) {
            let url = video
                .hls_url
                .clone()
                .or_else(|| video.fallback_url.clone())
                .or_else(|| video.dash_url.clone());
            return (url, false, true);
        }
    }

    if let Some(preview) = item
        .preview
        .as_ref()
        .and_then(|p| p.reddit_video_preview.as_ref())
    {
        if preview.is_gif {
            return (preview.fallback_url.clone(), true, true);
        }
    }

    (None, false, false)
}

/// Gallery posts contribute every gallery image in source order; plain
/// image posts contribute the single preview source.
fn extract_images(item: &RawItem) -> Vec<String> {
    if item.is_gallery {
        if let (Some(gallery), Some(metadata)) = (&item.gallery_data, &item.media_metadata) {
            return gallery
                .items
                .iter()
                .filter_map(|entry| entry.media_id.as_deref())
                .filter_map(|media_id| {
                    metadata
                        .get(media_id)
                        .and_then(|meta| meta.s.as_ref())
                        .and_then(|source| source.u.as_deref())
                })
                .map(unescape_entities)
                .collect();
        }
    }

    item.preview
        .as_ref()
        .and_then(|p| p.images.first())
        .and_then(|image| image.source.as_ref())
        .and_then(|source| source.url.as_deref())
        .map(|url| vec![unescape_entities(url)])
        .unwrap_or_default()
}

/// The upstream API double-encodes query strings in media URLs.
fn unescape_entities(url: &str) -> String {
    url.replace("&amp;", "&")
}

/// Absolute permalink, with the fallbacks comment items need.
fn permalink(item: &RawItem) -> Option<String> {
    if let Some(path) = item.permalink.as_deref() {
        if let Ok(absolute) = Url::parse("https://www.reddit.com").and_then(|base| base.join(path))
        {
            return Some(absolute.to_string());
        }
    }
    item.link_permalink
        .clone()
        .or_else(|| item.link_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(raw: serde_json::Value) -> Option<Post> {
        let item: RawItem = serde_json::from_value(raw).unwrap();
        normalize_item(item, Utc::now())
    }

    #[test]
    fn test_single_image_post() {
        let post = parse_one(serde_json::json!({
            "name": "t3_one",
            "title": "A picture",
            "subreddit": "pics",
            "permalink": "/r/pics/comments/one/a_picture/",
            "preview": {
                "images": [{"source": {"url": "https://preview.redd.it/a.jpg?width=640&amp;s=abc"}}]
            }
        }))
        .unwrap();

        assert_eq!(post.images, vec!["https://preview.redd.it/a.jpg?width=640&s=abc"]);
        assert_eq!(post.video, None);
        assert!(!post.is_gif_variant);
        assert_eq!(post.url, "https://www.reddit.com/r/pics/comments/one/a_picture/");
        assert_eq!(post.tags, vec!["reddit", "pics"]);
        assert_eq!(post.caption, "No description.");
    }

    #[test]
    fn test_gallery_preserves_source_order() {
        let post = parse_one(serde_json::json!({
            "name": "t3_gal",
            "title": "Gallery",
            "subreddit": "pics",
            "permalink": "/r/pics/comments/gal/gallery/",
            "is_gallery": true,
            "gallery_data": {"items": [
                {"media_id": "m2"},
                {"media_id": "m1"},
                {"media_id": "m3"}
            ]},
            "media_metadata": {
                "m1": {"s": {"u": "https://i.redd.it/1.jpg?a=1&amp;b=2"}},
                "m2": {"s": {"u": "https://i.redd.it/2.jpg"}},
                "m3": {"s": {"u": "https://i.redd.it/3.jpg"}}
            }
        }))
        .unwrap();

        assert_eq!(
            post.images,
            vec![
                "https://i.redd.it/2.jpg",
                "https://i.redd.it/1.jpg?a=1&b=2",
                "https://i.redd.it/3.jpg"
            ]
        );
        assert_eq!(post.video, None);
        assert!(post.images.iter().all(|u| !u.contains("&amp;")));
    }

    #[test]
    fn test_gallery_skips_missing_metadata() {
        let post = parse_one(serde_json::json!({
            "name": "t3_gal",
            "title": "Gallery",
            "subreddit": "pics",
            "permalink": "/r/pics/comments/gal/gallery/",
            "is_gallery": true,
            "gallery_data": {"items": [{"media_id": "m1"}, {"media_id": "gone"}]},
            "media_metadata": {"m1": {"s": {"u": "https://i.redd.it/1.jpg"}}}
        }))
        .unwrap();

        assert_eq!(post.images, vec!["https://i.redd.it/1.jpg"]);
    }

    #[test]
    fn test_native_video_prefers_hls() {
        let post = parse_one(serde_json::json!({
            "name": "t3_vid",
            "title": "A video",
            "subreddit": "videos",
            "permalink": "/r/videos/comments/vid/a_video/",
            "is_video": true,
            "media": {"reddit_video": {
                "hls_url": "https://v.redd.it/vid/HLSPlaylist.m3u8",
                "fallback_url": "https://v.redd.it/vid/DASH_720.mp4"
            }},
            "preview": {
                "images": [{"source": {"url": "https://preview.redd.it/thumb.jpg"}}]
            }
        }))
        .unwrap();

        assert_eq!(post.video.as_deref(), Some("https://v.redd.it/vid/HLSPlaylist.m3u8"));
        assert!(!post.is_gif_variant);
        // Video posts contribute zero images even when a preview exists
        assert!(post.images.is_empty());
    }

    #[test]
    fn test_gif_variant_detection() {
        let post = parse_one(serde_json::json!({
            "name": "t3_gif",
            "title": "A gif",
            "subreddit": "gifs",
            "permalink": "/r/gifs/comments/gif/a_gif/",
            "preview": {
                "images": [{"source": {"url": "https://preview.redd.it/thumb.jpg"}}],
                "reddit_video_preview": {
                    "is_gif": true,
                    "fallback_url": "https://v.redd.it/gif/DASH_480.mp4"
                }
            }
        }))
        .unwrap();

        assert_eq!(post.video.as_deref(), Some("https://v.redd.it/gif/DASH_480.mp4"));
        assert!(post.is_gif_variant);
        assert!(post.images.is_empty());
    }

    #[test]
    fn test_comment_synthesis() {
        let post = parse_one(serde_json::json!({
            "name": "t1_com",
            "body": "Great point about lifetimes.",
            "subreddit": "rust",
            "permalink": "/r/rust/comments/x/c/com/"
        }))
        .unwrap();

        assert_eq!(post.title, "Comment on r/rust");
        assert_eq!(post.caption, "Great point about lifetimes.");
        assert_eq!(post.tags, vec!["reddit", "rust"]);
    }

    #[test]
    fn test_unknown_item_synthesis() {
        let post = parse_one(serde_json::json!({
            "name": "t5_odd",
            "permalink": "/r/rust/about/"
        }))
        .unwrap();

        assert_eq!(post.title, "Unknown saved item");
        assert_eq!(post.caption, "No description available.");
        assert_eq!(post.tags, vec!["reddit"]);
    }

    #[test]
    fn test_caption_truncated_at_parse_time() {
        let long = "x".repeat(400);
        let post = parse_one(serde_json::json!({
            "name": "t3_long",
            "title": "Long",
            "selftext": long,
            "subreddit": "rust",
            "permalink": "/r/rust/comments/long/long/"
        }))
        .unwrap();

        assert_eq!(post.caption.chars().count(), CAPTION_MAX_CHARS);
    }

    #[test]
    fn test_permalink_fallbacks_for_comment_listings() {
        let post = parse_one(serde_json::json!({
            "name": "t1_c",
            "body": "text",
            "subreddit": "rust",
            "link_permalink": "https://www.reddit.com/r/rust/comments/x/"
        }))
        .unwrap();
        assert_eq!(post.url, "https://www.reddit.com/r/rust/comments/x/");
    }

    #[test]
    fn test_items_without_identity_or_url_dropped() {
        assert!(parse_one(serde_json::json!({"title": "no id", "permalink": "/r/a/"})).is_none());
        assert!(parse_one(serde_json::json!({"name": "t3_nourl", "title": "no url"})).is_none());
    }

    #[test]
    fn test_listing_parse_extracts_cursor() {
        let listing: Listing = serde_json::from_value(serde_json::json!({
            "data": {
                "children": [
                    {"kind": "t3", "data": {"name": "t3_a", "title": "A", "subreddit": "rust", "permalink": "/r/rust/a/"}}
                ],
                "after": "t3_a"
            }
        }))
        .unwrap();

        assert_eq!(listing.data.after.as_deref(), Some("t3_a"));
        let posts = parse_saved_items(listing.data.children, Utc::now());
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "t3_a");
    }
}
