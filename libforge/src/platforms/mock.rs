//! Mock platform for testing
//!
//! Compiled for all builds so integration tests outside the crate can drive
//! the publisher without network access. Behavior is steered through
//! [`MockConfig`]; every call is counted and published content is recorded.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::types::{AccountKind, PlatformKind, PublicationMetrics};

use super::{
    AccountMetricsInfo, OAuthUrl, PlatformAccountInfo, PlatformContent, PublishResult,
    RemotePost, SocialPlatform, TokenPair,
};

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub kind: PlatformKind,
    /// When false, `exchange_code` and `fetch_account` fail.
    pub auth_succeeds: bool,
    /// When false, `publish` fails.
    pub publish_succeeds: bool,
    /// When false, `post_metrics` and `account_metrics` fail.
    pub metrics_succeed: bool,
    /// When false, `recent_posts` reports the capability as unsupported.
    pub support_feed: bool,
    /// Page-scoped token returned from `fetch_account`, if any.
    pub page_access_token: Option<String>,
    pub followers: i64,
    pub metrics: PublicationMetrics,
    /// Feed returned by `recent_posts` when the capability is supported.
    pub remote_posts: Vec<RemotePost>,
}

impl MockConfig {
    pub fn for_kind(kind: PlatformKind) -> Self {
        Self {
            kind,
            auth_succeeds: true,
            publish_succeeds: true,
            metrics_succeed: true,
            support_feed: true,
            page_access_token: None,
            followers: 100,
            metrics: PublicationMetrics::default(),
            remote_posts: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockCalls {
    pub exchange_code: usize,
    pub fetch_account: usize,
    pub publish: usize,
    pub post_metrics: usize,
    pub account_metrics: usize,
    pub recent_posts: usize,
}

pub struct MockPlatform {
    config: MockConfig,
    calls: Arc<Mutex<MockCalls>>,
    published: Arc<Mutex<Vec<PlatformContent>>>,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: Arc::new(Mutex::new(MockCalls::default())),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared call-count handle, usable after the platform moves into the
    /// publisher registry.
    pub fn calls(&self) -> Arc<Mutex<MockCalls>> {
        self.calls.clone()
    }

    /// Shared record of everything handed to `publish`.
    pub fn published(&self) -> Arc<Mutex<Vec<PlatformContent>>> {
        self.published.clone()
    }

    fn name(&self) -> String {
        self.config.kind.as_str().to_string()
    }
}

#[async_trait]
impl SocialPlatform for MockPlatform {
    fn kind(&self) -> PlatformKind {
        self.config.kind
    }

    fn auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<OAuthUrl> {
        let state = format!("mockstate:{}", user_id);
        Ok(OAuthUrl {
            url: format!(
                "https://mock.example/oauth?redirect_uri={}&state={}",
                redirect_uri, state
            ),
            state,
        })
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenPair> {
        self.calls.lock().unwrap().exchange_code += 1;
        if !self.config.auth_succeeds {
            return Err(PlatformError::Authentication {
                platform: self.name(),
                message: "mock auth failure".to_string(),
            }
            .into());
        }
        Ok(TokenPair {
            access_token: format!("mock-token-{}", code),
            refresh_token: Some("mock-refresh".to_string()),
            expires_at: chrono::Utc::now().timestamp() + 3600,
            scopes: vec!["mock.scope".to_string()],
        })
    }

    async fn fetch_account(&self, _access_token: &str) -> Result<PlatformAccountInfo> {
        self.calls.lock().unwrap().fetch_account += 1;
        if !self.config.auth_succeeds {
            return Err(PlatformError::Authentication {
                platform: self.name(),
                message: "mock account lookup failure".to_string(),
            }
            .into());
        }
        Ok(PlatformAccountInfo {
            platform_account_id: format!("mock-{}-acct", self.name()),
            account_name: format!("Mock {} Account", self.name()),
            account_type: AccountKind::Profile,
            avatar_url: None,
            page_access_token: self.config.page_access_token.clone(),
        })
    }

    async fn publish(
        &self,
        _access_token: &str,
        content: &PlatformContent,
    ) -> Result<PublishResult> {
        self.calls.lock().unwrap().publish += 1;
        if !self.config.publish_succeeds {
            return Err(PlatformError::Publishing {
                platform: self.name(),
                message: "mock publish failure".to_string(),
            }
            .into());
        }
        self.published.lock().unwrap().push(content.clone());
        let n = self.calls.lock().unwrap().publish;
        Ok(PublishResult {
            platform_post_id: format!("mock-post-{}", n),
            platform_post_url: Some(format!("https://mock.example/posts/mock-post-{}", n)),
        })
    }

    async fn post_metrics(
        &self,
        _access_token: &str,
        _post_id: &str,
    ) -> Result<PublicationMetrics> {
        self.calls.lock().unwrap().post_metrics += 1;
        if !self.config.metrics_succeed {
            return Err(PlatformError::Metrics {
                platform: self.name(),
                message: "mock metrics failure".to_string(),
            }
            .into());
        }
        Ok(self.config.metrics.clone())
    }

    async fn account_metrics(
        &self,
        _access_token: &str,
        _account_id: &str,
    ) -> Result<AccountMetricsInfo> {
        self.calls.lock().unwrap().account_metrics += 1;
        if !self.config.metrics_succeed {
            return Err(PlatformError::Metrics {
                platform: self.name(),
                message: "mock metrics failure".to_string(),
            }
            .into());
        }
        Ok(AccountMetricsInfo {
            followers: self.config.followers,
            ..Default::default()
        })
    }

    async fn recent_posts(
        &self,
        _access_token: &str,
        _account_id: &str,
    ) -> Result<Vec<RemotePost>> {
        self.calls.lock().unwrap().recent_posts += 1;
        if !self.config.support_feed {
            return Err(PlatformError::NotSupported {
                platform: self.name(),
                message: "feed listing not supported".to_string(),
            }
            .into());
        }
        Ok(self.config.remote_posts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_published_content() {
        let platform = MockPlatform::new(MockConfig::for_kind(PlatformKind::Facebook));
        let published = platform.published();
        let content = PlatformContent {
            caption: "hello".to_string(),
            hashtags: vec![],
            media_url: None,
            media_type: None,
            account_id: "acct".to_string(),
        };

        let result = platform.publish("token", &content).await.unwrap();
        assert_eq!(result.platform_post_id, "mock-post-1");
        assert_eq!(published.lock().unwrap().len(), 1);
        assert_eq!(published.lock().unwrap()[0].caption, "hello");
    }

    #[tokio::test]
    async fn test_mock_publish_failure_records_nothing() {
        let platform = MockPlatform::new(MockConfig {
            publish_succeeds: false,
            ..MockConfig::for_kind(PlatformKind::TikTok)
        });
        let published = platform.published();
        let calls = platform.calls();
        let content = PlatformContent {
            caption: "hello".to_string(),
            hashtags: vec![],
            media_url: None,
            media_type: None,
            account_id: "acct".to_string(),
        };

        assert!(platform.publish("token", &content).await.is_err());
        assert!(published.lock().unwrap().is_empty());
        assert_eq!(calls.lock().unwrap().publish, 1);
    }

    #[tokio::test]
    async fn test_page_token_surfaces_in_account_info() {
        let platform = MockPlatform::new(MockConfig {
            page_access_token: Some("page-token".to_string()),
            ..MockConfig::for_kind(PlatformKind::Facebook)
        });
        let info = platform.fetch_account("user-token").await.unwrap();
        assert_eq!(info.page_access_token.as_deref(), Some("page-token"));
    }
}
