//! Credential boundary.
//!
//! The interactive OAuth flow lives outside this crate; it hands the token
//! grants it obtains to `store_reddit_credentials` / `store_x_credentials`.
//! This module owns persistence of the credential triples, the Reddit
//! refresh-token exchange, and the X disconnect/reconnect-lockout
//! bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::store::{keys, KvStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint request failed: {0}")]
    Http(String),
    #[error("token endpoint rejected the exchange: {0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// A token grant as returned by an OAuth token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// A credential triple loaded from the store.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_millis: Option<i64>,
}

impl StoredCredentials {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_millis
            .is_some_and(|expiry| expiry <= now.timestamp_millis())
    }
}

/// Reconnect-lockout status for X.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectStatus {
    pub allowed: bool,
    /// Human-readable remaining time, present only while locked out.
    pub remaining: Option<String>,
}

struct CredentialKeys {
    token: &'static str,
    refresh: &'static str,
    expiry: &'static str,
}

const REDDIT_KEYS: CredentialKeys = CredentialKeys {
    token: keys::REDDIT_TOKEN,
    refresh: keys::REDDIT_REFRESH_TOKEN,
    expiry: keys::REDDIT_TOKEN_EXPIRY,
};

const X_KEYS: CredentialKeys = CredentialKeys {
    token: keys::X_TOKEN,
    refresh: keys::X_REFRESH_TOKEN,
    expiry: keys::X_TOKEN_EXPIRY,
};

async fn load_credentials(
    store: &dyn KvStore,
    credential_keys: &CredentialKeys,
) -> Result<Option<StoredCredentials>, StoreError> {
    let Some(access_token) = store.get(credential_keys.token).await? else {
        return Ok(None);
    };
    let refresh_token = store.get(credential_keys.refresh).await?;
    let expires_at_millis = store
        .get(credential_keys.expiry)
        .await?
        .and_then(|raw| raw.parse().ok());
    Ok(Some(StoredCredentials {
        access_token,
        refresh_token,
        expires_at_millis,
    }))
}

async fn save_grant(
    store: &dyn KvStore,
    credential_keys: &CredentialKeys,
    grant: &TokenGrant,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    let Some(access_token) = grant.access_token.clone() else {
        return Err(AuthError::Rejected(
            "response carried no access token".to_string(),
        ));
    };
    store.set(credential_keys.token, &access_token).await?;
    if let Some(refresh) = &grant.refresh_token {
        store.set(credential_keys.refresh, refresh).await?;
    }
    if let Some(expires_in) = grant.expires_in {
        let expiry = now.timestamp_millis() + expires_in * 1000;
        store.set(credential_keys.expiry, &expiry.to_string()).await?;
    }
    Ok(access_token)
}

/// Persist a Reddit token grant obtained by the external OAuth flow.
///
/// # Errors
///
/// Returns an error if the grant has no access token or the store fails.
pub async fn store_reddit_credentials(
    store: &dyn KvStore,
    grant: &TokenGrant,
) -> Result<(), AuthError> {
    save_grant(store, &REDDIT_KEYS, grant, Utc::now()).await?;
    info!("Reddit credentials stored");
    Ok(())
}

/// Persist an X token grant obtained by the external OAuth flow.
///
/// # Errors
///
/// Returns an error if the grant has no access token or the store fails.
pub async fn store_x_credentials(store: &dyn KvStore, grant: &TokenGrant) -> Result<(), AuthError> {
    save_grant(store, &X_KEYS, grant, Utc::now()).await?;
    info!("X credentials stored");
    Ok(())
}

/// Load the stored Reddit credential triple.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn load_reddit_credentials(
    store: &dyn KvStore,
) -> Result<Option<StoredCredentials>, StoreError> {
    load_credentials(store, &REDDIT_KEYS).await
}

/// Load the stored X credential triple.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn load_x_credentials(
    store: &dyn KvStore,
) -> Result<Option<StoredCredentials>, StoreError> {
    load_credentials(store, &X_KEYS).await
}

/// Purge the Reddit credential triple.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn purge_reddit_credentials(store: &dyn KvStore) -> Result<(), StoreError> {
    store
        .remove_many(&[REDDIT_KEYS.token, REDDIT_KEYS.refresh, REDDIT_KEYS.expiry])
        .await
}

/// Purge the X credential triple.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn purge_x_credentials(store: &dyn KvStore) -> Result<(), StoreError> {
    store
        .remove_many(&[X_KEYS.token, X_KEYS.refresh, X_KEYS.expiry])
        .await
}

/// Disconnect Reddit: purge the credential triple.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn disconnect_reddit(store: &dyn KvStore) -> Result<(), StoreError> {
    purge_reddit_credentials(store).await?;
    info!("Reddit disconnected");
    Ok(())
}

/// Disconnect X: purge the credential triple, record the disconnect instant
/// for the reconnect lockout, and clear the fetch-cooldown stamp.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn disconnect_x(store: &dyn KvStore) -> Result<(), StoreError> {
    purge_x_credentials(store).await?;
    store
        .set(
            keys::X_DISCONNECTED_AT,
            &Utc::now().timestamp_millis().to_string(),
        )
        .await?;
    store.remove(keys::X_CACHE_TIME).await?;
    info!("X disconnected");
    Ok(())
}

/// Whether reconnecting X is currently allowed.
///
/// Reconnecting is refused for `lockout` after the recorded disconnect;
/// while refused, `remaining` carries a human-readable wait time.
///
/// # Errors
///
/// Returns an error if the store backend fails.
pub async fn x_reconnect_status(
    store: &dyn KvStore,
    lockout: Duration,
    now: DateTime<Utc>,
) -> Result<ReconnectStatus, StoreError> {
    let Some(disconnected_at) = store
        .get(keys::X_DISCONNECTED_AT)
        .await?
        .and_then(|raw| raw.parse::<i64>().ok())
    else {
        return Ok(ReconnectStatus {
            allowed: true,
            remaining: None,
        });
    };

    let elapsed_millis = now.timestamp_millis() - disconnected_at;
    let lockout_millis = i64::try_from(lockout.as_millis()).unwrap_or(i64::MAX);
    if elapsed_millis >= lockout_millis {
        return Ok(ReconnectStatus {
            allowed: true,
            remaining: None,
        });
    }

    let remaining = format_remaining(lockout_millis - elapsed_millis);
    debug!(remaining = %remaining, "X reconnect locked out");
    Ok(ReconnectStatus {
        allowed: false,
        remaining: Some(remaining),
    })
}

/// Exchange a Reddit refresh token for a new access token and persist the
/// rotated pair.
///
/// # Errors
///
/// Returns an error if the HTTP exchange fails, the endpoint rejects the
/// refresh token, or the store fails.
pub async fn refresh_reddit_token(
    client: &reqwest::Client,
    config: &Config,
    store: &dyn KvStore,
    refresh_token: &str,
) -> Result<String, AuthError> {
    debug!("Refreshing Reddit token");
    let response = client
        .post(&config.reddit_token_endpoint)
        // Installed-app client: client id with an empty secret.
        .basic_auth(&config.reddit_client_id, Some(""))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected(format!(
            "token endpoint returned {status}"
        )));
    }

    let grant: TokenGrant = response
        .json()
        .await
        .map_err(|e| AuthError::Rejected(format!("unreadable token response: {e}")))?;

    save_grant(store, &REDDIT_KEYS, &grant, Utc::now()).await
}

fn format_remaining(millis: i64) -> String {
    let total_secs = (millis + 999) / 1000;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    const LOCKOUT: Duration = Duration::from_secs(18 * 60);

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(45_000), "45s");
        assert_eq!(format_remaining(17 * 60 * 1000 + 3000), "17m 03s");
        // Partial seconds round up
        assert_eq!(format_remaining(1), "1s");
    }

    #[test]
    fn test_is_expired() {
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let creds = StoredCredentials {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at_millis: Some(999_999),
        };
        assert!(creds.is_expired(now));

        let creds = StoredCredentials {
            expires_at_millis: Some(1_000_001),
            ..creds
        };
        assert!(!creds.is_expired(now));

        let creds = StoredCredentials {
            expires_at_millis: None,
            ..creds
        };
        assert!(!creds.is_expired(now));
    }

    #[tokio::test]
    async fn test_reconnect_allowed_with_no_disconnect_record() {
        let store = MemoryStore::new();
        let status = x_reconnect_status(&store, LOCKOUT, Utc::now()).await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, None);
    }

    #[tokio::test]
    async fn test_reconnect_locked_immediately_after_disconnect() {
        let store = MemoryStore::new();
        let now = Utc.timestamp_millis_opt(10_000_000).unwrap();
        store
            .set(keys::X_DISCONNECTED_AT, &now.timestamp_millis().to_string())
            .await
            .unwrap();

        let status = x_reconnect_status(&store, LOCKOUT, now).await.unwrap();
        assert!(!status.allowed);
        assert!(!status.remaining.as_deref().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_allowed_after_lockout_elapses() {
        let store = MemoryStore::new();
        let disconnected = Utc.timestamp_millis_opt(10_000_000).unwrap();
        store
            .set(
                keys::X_DISCONNECTED_AT,
                &disconnected.timestamp_millis().to_string(),
            )
            .await
            .unwrap();

        let later = disconnected + chrono::Duration::minutes(19);
        let status = x_reconnect_status(&store, LOCKOUT, later).await.unwrap();
        assert!(status.allowed);
    }

    #[tokio::test]
    async fn test_disconnect_x_records_instant_and_purges() {
        let store = MemoryStore::new();
        store.set(keys::X_TOKEN, "token").await.unwrap();
        store.set(keys::X_REFRESH_TOKEN, "refresh").await.unwrap();
        store.set(keys::X_CACHE_TIME, "123").await.unwrap();

        disconnect_x(&store).await.unwrap();

        assert_eq!(store.get(keys::X_TOKEN).await.unwrap(), None);
        assert_eq!(store.get(keys::X_REFRESH_TOKEN).await.unwrap(), None);
        assert_eq!(store.get(keys::X_CACHE_TIME).await.unwrap(), None);
        assert!(store.get(keys::X_DISCONNECTED_AT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_credentials_round_trip() {
        let store = MemoryStore::new();
        let grant = TokenGrant {
            access_token: Some("access".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_in: Some(3600),
        };
        store_reddit_credentials(&store, &grant).await.unwrap();

        let creds = load_reddit_credentials(&store).await.unwrap().unwrap();
        assert_eq!(creds.access_token, "access");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
        assert!(!creds.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_store_credentials_without_access_token_rejected() {
        let store = MemoryStore::new();
        let grant = TokenGrant {
            access_token: None,
            refresh_token: None,
            expires_in: None,
        };
        assert!(matches!(
            store_x_credentials(&store, &grant).await,
            Err(AuthError::Rejected(_))
        ));
    }
}
