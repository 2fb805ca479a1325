//! Platform abstraction and implementations
//!
//! One uniform capability set per social network: authorize, exchange code,
//! refresh, fetch account, publish, read metrics. Per-network quirks (page
//! scoped tokens, video-only init publish, feed-based discovery) stay fully
//! contained behind this trait. The set of platforms is closed; dispatch goes
//! through the [`Publisher`] registry keyed by [`PlatformKind`].

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{AccountKind, PlatformKind, PublicationMetrics};

pub mod facebook;
pub mod instagram;
pub mod tiktok;

// Mock platform is available for all builds (not just tests) to support
// integration tests.
pub mod mock;

/// Percent-encode everything outside the unreserved set. Used for OAuth
/// redirect URIs and for prompts embedded in request paths.
pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct OAuthUrl {
    pub url: String,
    /// Opaque state echoed back on the callback. For PKCE flows this also
    /// carries the code verifier after a `|` separator.
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlatformAccountInfo {
    pub platform_account_id: String,
    pub account_name: String,
    pub account_type: AccountKind,
    pub avatar_url: Option<String>,
    /// Page-scoped access token. When present it must be stored in place of
    /// the user token.
    pub page_access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMediaType {
    Image,
    Video,
}

/// What dispatch hands to a platform: the variant-selected caption plus the
/// resolved media.
#[derive(Debug, Clone)]
pub struct PlatformContent {
    pub caption: String,
    pub hashtags: Vec<String>,
    pub media_url: Option<String>,
    pub media_type: Option<PublishMediaType>,
    /// External account/page id targeted by the publish endpoint.
    pub account_id: String,
}

impl PlatformContent {
    /// Caption with hashtags appended, the form most feed endpoints accept.
    pub fn full_caption(&self) -> String {
        if self.hashtags.is_empty() {
            self.caption.clone()
        } else {
            format!("{}\n\n{}", self.caption, self.hashtags.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub platform_post_id: String,
    pub platform_post_url: Option<String>,
}

/// A post as seen in the platform's own feed, used by discovery.
#[derive(Debug, Clone)]
pub struct RemotePost {
    pub id: String,
    pub url: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountMetricsInfo {
    pub followers: i64,
    pub followers_growth: i64,
    pub total_views: i64,
    pub total_watch_minutes: i64,
    pub avg_engagement_rate: f64,
}

#[async_trait]
pub trait SocialPlatform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Build the authorization redirect URL and its opaque state.
    fn auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<OAuthUrl>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair>;

    /// Code exchange carrying the PKCE verifier recovered from the callback
    /// state. Platforms without PKCE ignore the verifier.
    async fn exchange_code_with_verifier(
        &self,
        code: &str,
        redirect_uri: &str,
        _verifier: &str,
    ) -> Result<TokenPair> {
        self.exchange_code(code, redirect_uri).await
    }

    /// Refresh an access token. Platforms without refresh tokens keep the
    /// default.
    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenPair> {
        Err(PlatformError::NotSupported {
            platform: self.kind().as_str().to_string(),
            message: "token refresh not supported".to_string(),
        }
        .into())
    }

    /// Resolve the connected account behind a user token.
    async fn fetch_account(&self, access_token: &str) -> Result<PlatformAccountInfo>;

    async fn publish(
        &self,
        access_token: &str,
        content: &PlatformContent,
    ) -> Result<PublishResult>;

    async fn post_metrics(&self, access_token: &str, post_id: &str)
        -> Result<PublicationMetrics>;

    async fn account_metrics(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<AccountMetricsInfo>;

    /// Recent posts from the account's own feed. Platforms without a usable
    /// listing keep the default; discovery treats it as "nothing to find".
    async fn recent_posts(
        &self,
        _access_token: &str,
        _account_id: &str,
    ) -> Result<Vec<RemotePost>> {
        Err(PlatformError::NotSupported {
            platform: self.kind().as_str().to_string(),
            message: "feed listing not supported".to_string(),
        }
        .into())
    }
}

impl std::fmt::Debug for dyn SocialPlatform + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SocialPlatform({})", self.kind().as_str())
    }
}

/// Registry mapping each platform tag to its implementation. Construction
/// from config wires the real platforms; tests swap entries for mocks.
pub struct Publisher {
    platforms: HashMap<PlatformKind, Box<dyn SocialPlatform>>,
}

impl Publisher {
    /// Build the registry from configured OAuth apps. Platforms without an
    /// app config are simply absent and surface as `NotSupported` on use.
    pub fn from_config(config: &Config) -> Self {
        let mut platforms: HashMap<PlatformKind, Box<dyn SocialPlatform>> = HashMap::new();

        if let Some(app) = &config.platforms.facebook {
            platforms.insert(
                PlatformKind::Facebook,
                Box::new(facebook::FacebookPlatform::new(app.clone())),
            );
        }
        if let Some(app) = &config.platforms.tiktok {
            platforms.insert(
                PlatformKind::TikTok,
                Box::new(tiktok::TikTokPlatform::new(app.clone())),
            );
        }
        if let Some(app) = &config.platforms.instagram {
            platforms.insert(
                PlatformKind::Instagram,
                Box::new(instagram::InstagramPlatform::new(app.clone())),
            );
        }

        Self { platforms }
    }

    pub fn empty() -> Self {
        Self {
            platforms: HashMap::new(),
        }
    }

    /// Replace or insert a platform implementation (mocks in tests).
    pub fn with_platform(mut self, platform: Box<dyn SocialPlatform>) -> Self {
        self.platforms.insert(platform.kind(), platform);
        self
    }

    pub fn get(&self, kind: PlatformKind) -> Result<&dyn SocialPlatform> {
        self.platforms
            .get(&kind)
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                PlatformError::NotSupported {
                    platform: kind.as_str().to_string(),
                    message: "platform not configured".to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockConfig, MockPlatform};
    use super::*;

    #[test]
    fn test_registry_dispatch_and_missing_platform() {
        let publisher = Publisher::empty().with_platform(Box::new(MockPlatform::new(
            MockConfig::for_kind(PlatformKind::Facebook),
        )));

        assert!(publisher.get(PlatformKind::Facebook).is_ok());
        let err = publisher.get(PlatformKind::TikTok).unwrap_err();
        assert!(err.to_string().contains("tiktok"));
    }

    #[test]
    fn test_urlencode_passes_unreserved() {
        assert_eq!(urlencode("abc-XYZ_0.9~"), "abc-XYZ_0.9~");
        assert_eq!(urlencode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_full_caption_appends_hashtags() {
        let content = PlatformContent {
            caption: "Caption".to_string(),
            hashtags: vec!["#a".to_string(), "#b".to_string()],
            media_url: None,
            media_type: None,
            account_id: "acct".to_string(),
        };
        assert_eq!(content.full_caption(), "Caption\n\n#a #b");
    }

    #[tokio::test]
    async fn test_recent_posts_defaults_to_not_supported() {
        let platform = MockPlatform::new(MockConfig {
            support_feed: false,
            ..MockConfig::for_kind(PlatformKind::TikTok)
        });
        let err = platform.recent_posts("token", "acct").await.unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
