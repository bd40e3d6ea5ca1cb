//! Per-platform saved-post fetchers.
//!
//! Each fetcher drives the same three phases (token, identity, page) against
//! its platform API and normalizes the response into [`Post`] records.
//! Expected conditions (missing auth, a rejected credential, rate limiting,
//! network faults) are values of [`FetchError`], never panics; the
//! aggregator downgrades them to per-platform annotations.

pub mod reddit;
pub mod x;

pub use reddit::RedditFetcher;
pub use x::XFetcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Post, Source};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No usable credential; recoverable by running the connect flow.
    #[error("no credential available")]
    NoAuth,
    /// The platform rejected the stored credential (401). The credential
    /// triple has been purged so the next attempt is a clean `NoAuth`.
    #[error("credential rejected by the platform")]
    Unauthorized,
    /// The platform refused the request with a 429.
    #[error("rate limited by the platform")]
    RateLimited,
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected response shape: {0}")]
    Parse(String),
    #[error("storage failure: {0}")]
    Store(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<StoreError> for FetchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl FetchError {
    /// User-facing prompt when the fix is (re)connecting the account.
    #[must_use]
    pub fn connect_prompt(&self, source: Source) -> Option<String> {
        match self {
            Self::NoAuth | Self::Unauthorized => Some(format!(
                "Please connect your {} account.",
                source.display_name()
            )),
            _ => None,
        }
    }
}

/// One page of fetch results.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub posts: Vec<Post>,
    /// Opaque continuation token; `None` when the listing is exhausted.
    pub cursor: Option<String>,
    /// True when the posts came from the local snapshot instead of the
    /// network (X fetch cooldown).
    pub served_from_cache: bool,
}

/// A connected platform's saved-post feed.
#[async_trait]
pub trait SavedFeed: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch the feed's first page.
    ///
    /// Platform policies apply here: the Reddit fetcher bulk-imports the
    /// whole listing on a fresh account, the X fetcher serves its persisted
    /// snapshot while its fetch cooldown is active.
    async fn first_page(&self) -> Result<FetchedPage, FetchError>;

    /// Fetch one page continuing from `cursor`.
    async fn next_page(&self, cursor: &str) -> Result<FetchedPage, FetchError>;
}
