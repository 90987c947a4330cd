//! Best-effort follower count lookup.
//!
//! The public profile page embeds the follower count in its hydration JSON. The
//! lookup never fails: network errors, timeouts and pages without the field all
//! yield 0.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{LiveError, Result};

/// Default browser user agent for profile requests.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Default profile page template; `{account}` is replaced by the account id.
pub const DEFAULT_PROFILE_URL: &str = "https://www.tiktok.com/@{account}";

static FOLLOWER_COUNT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""followerCount"\s*:\s*(\d+)"#).unwrap());

/// Source of follower counts.
#[async_trait]
pub trait FollowerLookup: Send + Sync {
    /// Follower count of the account, 0 when it cannot be determined.
    async fn fetch(&self, account_id: &str) -> u64;
}

/// Lookup that always reports 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLookup;

#[async_trait]
impl FollowerLookup for DisabledLookup {
    async fn fetch(&self, _account_id: &str) -> u64 {
        0
    }
}

/// Configuration for [`HttpFollowerLookup`].
#[derive(Debug, Clone)]
pub struct FollowerLookupConfig {
    /// Profile URL template containing `{account}`
    pub profile_url: String,
    /// User agent sent with the request
    pub user_agent: String,
    /// Total request timeout
    pub timeout: Duration,
}

impl Default for FollowerLookupConfig {
    fn default() -> Self {
        Self {
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            user_agent: DEFAULT_UA.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Scrapes the follower count from the public profile page.
#[derive(Debug, Clone)]
pub struct HttpFollowerLookup {
    client: Client,
    config: FollowerLookupConfig,
}

impl HttpFollowerLookup {
    /// Create a lookup with its own HTTP client.
    pub fn new(config: FollowerLookupConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    fn profile_url(&self, account_id: &str) -> String {
        self.config.profile_url.replace("{account}", account_id)
    }

    async fn try_fetch(&self, account_id: &str) -> Result<u64> {
        let url = self.profile_url(account_id);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .timeout(self.config.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LiveError::connection(format!(
                "Profile request failed: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_follower_count(&body)
            .ok_or_else(|| LiveError::protocol("followerCount not found in profile page"))
    }
}

#[async_trait]
impl FollowerLookup for HttpFollowerLookup {
    async fn fetch(&self, account_id: &str) -> u64 {
        match self.try_fetch(account_id).await {
            Ok(count) => {
                debug!(account = %account_id, followers = count, "Fetched follower count");
                count
            }
            Err(LiveError::Protocol(msg)) => {
                debug!(account = %account_id, "{}", msg);
                0
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "Follower lookup failed");
                0
            }
        }
    }
}

/// Extract the first `"followerCount":N` value from a page.
pub fn parse_follower_count(body: &str) -> Option<u64> {
    FOLLOWER_COUNT_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_follower_count() {
        let page = r#"<script>{"stats":{"followerCount":12345,"followingCount":7}}</script>"#;
        assert_eq!(parse_follower_count(page), Some(12345));
        assert_eq!(parse_follower_count(r#""followerCount" : 9"#), Some(9));
    }

    #[test]
    fn test_parse_missing_or_malformed() {
        assert_eq!(parse_follower_count("<html></html>"), None);
        assert_eq!(parse_follower_count(r#""followerCount":"abc""#), None);
        assert_eq!(
            parse_follower_count(r#""followerCount":99999999999999999999999"#),
            None
        );
    }

    #[test]
    fn test_profile_url_template() {
        let lookup = HttpFollowerLookup::new(FollowerLookupConfig::default()).unwrap();
        assert_eq!(lookup.profile_url("alice"), "https://www.tiktok.com/@alice");
    }

    #[tokio::test]
    async fn test_network_error_yields_zero() {
        let lookup = HttpFollowerLookup::new(FollowerLookupConfig {
            profile_url: "http://127.0.0.1:9/@{account}".to_string(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(lookup.fetch("alice").await, 0);
    }

    #[tokio::test]
    async fn test_disabled_lookup() {
        assert_eq!(DisabledLookup.fetch("alice").await, 0);
    }
}
