use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Reddit API
    pub reddit_api_base: String,
    pub reddit_token_endpoint: String,
    pub reddit_client_id: String,

    // X API
    pub x_api_base: String,

    // Fetch policy
    pub page_size: u32,
    pub http_timeout: Duration,
    pub user_agent: String,

    // X cooldown policy
    pub x_fetch_cooldown: Duration,
    pub x_reconnect_lockout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/taggy.sqlite")),

            reddit_api_base: env_or_default("REDDIT_API_BASE", "https://oauth.reddit.com"),
            reddit_token_endpoint: env_or_default(
                "REDDIT_TOKEN_ENDPOINT",
                "https://www.reddit.com/api/v1/access_token",
            ),
            reddit_client_id: required_env("REDDIT_CLIENT_ID")?,

            x_api_base: env_or_default("X_API_BASE", "https://api.twitter.com"),

            page_size: parse_env_u32("PAGE_SIZE", 100)?,
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            user_agent: env_or_default("USER_AGENT", "taggy/0.1 (saved-post sync)"),

            x_fetch_cooldown: Duration::from_secs(parse_env_u64(
                "X_FETCH_COOLDOWN_SECS",
                3 * 60 * 60,
            )?),
            x_reconnect_lockout: Duration::from_secs(parse_env_u64(
                "X_RECONNECT_LOCKOUT_SECS",
                18 * 60,
            )?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(25..=100).contains(&self.page_size) {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_SIZE".to_string(),
                message: format!("must be between 25 and 100, got {}", self.page_size),
            });
        }
        if self.reddit_client_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "REDDIT_CLIENT_ID".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.user_agent.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "USER_AGENT".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// A configuration suitable for tests: no env access, API bases meant
    /// to be overridden with a mock server URI.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            reddit_api_base: "http://127.0.0.1:0".to_string(),
            reddit_token_endpoint: "http://127.0.0.1:0/api/v1/access_token".to_string(),
            reddit_client_id: "test-client".to_string(),
            x_api_base: "http://127.0.0.1:0".to_string(),
            page_size: 25,
            http_timeout: Duration::from_secs(5),
            user_agent: "taggy-tests/0.1".to_string(),
            x_fetch_cooldown: Duration::from_secs(3 * 60 * 60),
            x_reconnect_lockout: Duration::from_secs(18 * 60),
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_validates() {
        assert!(Config::for_testing().validate().is_ok());
    }

    #[test]
    fn test_page_size_bounds() {
        let mut config = Config::for_testing();
        config.page_size = 24;
        assert!(config.validate().is_err());
        config.page_size = 101;
        assert!(config.validate().is_err());
        config.page_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut config = Config::for_testing();
        config.reddit_client_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_defaults_and_overrides() {
        std::env::set_var("REDDIT_CLIENT_ID", "client-from-env");
        std::env::set_var("PAGE_SIZE", "50");
        std::env::remove_var("X_API_BASE");

        let config = Config::from_env().unwrap();
        assert_eq!(config.reddit_client_id, "client-from-env");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.x_api_base, "https://api.twitter.com");
        assert_eq!(config.x_reconnect_lockout, Duration::from_secs(18 * 60));
        assert_eq!(config.x_fetch_cooldown, Duration::from_secs(3 * 60 * 60));

        std::env::remove_var("REDDIT_CLIENT_ID");
        std::env::remove_var("PAGE_SIZE");
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_requires_client_id() {
        std::env::remove_var("REDDIT_CLIENT_ID");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }
}
