//! Facebook Pages integration (Graph API)
//!
//! Quirks contained here: connecting resolves the user's first managed Page
//! and returns that Page's own access token, which must be stored instead of
//! the user token; discovery walks the Page feed; account metrics come from
//! Page fields plus insights.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::types::{AccountKind, PlatformKind, PublicationMetrics};

use super::{
    AccountMetricsInfo, OAuthUrl, PlatformAccountInfo, PlatformContent, PublishMediaType,
    PublishResult, RemotePost, SocialPlatform, TokenPair,
};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const AUTH_BASE: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SCOPES: [&str; 5] = [
    "pages_show_list",
    "pages_manage_posts",
    "pages_read_engagement",
    "read_insights",
    "business_management",
];

pub struct FacebookPlatform {
    app: OAuthAppConfig,
    client: reqwest::Client,
}

impl FacebookPlatform {
    pub fn new(app: OAuthAppConfig) -> Self {
        Self {
            app,
            client: reqwest::Client::new(),
        }
    }

    /// GET against the Graph API. A Graph error envelope is reported through
    /// `api_error`, so each caller surfaces its own failure kind.
    async fn graph_get<E>(
        &self,
        path_and_query: &str,
        access_token: &str,
        api_error: E,
    ) -> Result<Value>
    where
        E: Fn(String) -> PlatformError,
    {
        let sep = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}/{}{}access_token={}",
            GRAPH_BASE, path_and_query, sep, access_token
        );

        let network = |message: String| PlatformError::Network {
            platform: "facebook".to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| network(e.to_string()))?;

        if let Some(message) = body["error"]["message"].as_str() {
            return Err(api_error(message.to_string()).into());
        }
        if !status.is_success() {
            return Err(network(format!("HTTP {}", status)).into());
        }

        Ok(body)
    }
}

fn auth_error(message: String) -> PlatformError {
    PlatformError::Authentication {
        platform: "facebook".to_string(),
        message,
    }
}

fn metrics_error(message: String) -> PlatformError {
    PlatformError::Metrics {
        platform: "facebook".to_string(),
        message,
    }
}

#[async_trait]
impl SocialPlatform for FacebookPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    fn auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<OAuthUrl> {
        let nonce: u64 = rand::thread_rng().gen();
        let state = format!("{:016x}:{}", nonce, user_id);
        let url = format!(
            "{}?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code",
            AUTH_BASE,
            self.app.client_id,
            super::urlencode(redirect_uri),
            state,
            SCOPES.join(",")
        );
        Ok(OAuthUrl { url, state })
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair> {
        let url = format!(
            "{}/oauth/access_token?client_id={}&client_secret={}&redirect_uri={}&code={}",
            GRAPH_BASE,
            self.app.client_id,
            self.app.client_secret,
            super::urlencode(redirect_uri),
            code
        );

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PlatformError::Network {
                platform: "facebook".to_string(),
                message: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| PlatformError::Network {
            platform: "facebook".to_string(),
            message: e.to_string(),
        })?;

        let access_token = body["access_token"].as_str().ok_or_else(|| {
            PlatformError::Authentication {
                platform: "facebook".to_string(),
                message: body["error"]["message"]
                    .as_str()
                    .unwrap_or("no access token in response")
                    .to_string(),
            }
        })?;

        let expires_in = body["expires_in"].as_i64().unwrap_or(60 * 24 * 3600);

        Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: chrono::Utc::now().timestamp() + expires_in,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Resolves the first managed Page. The returned `page_access_token` is
    /// the credential that must be stored; the user token cannot post to the
    /// Page.
    async fn fetch_account(&self, access_token: &str) -> Result<PlatformAccountInfo> {
        let body = self
            .graph_get(
                "me/accounts?fields=id,name,access_token,picture{url}",
                access_token,
                auth_error,
            )
            .await?;

        let page = body["data"].as_array().and_then(|pages| pages.first());
        let Some(page) = page else {
            return Err(PlatformError::Authentication {
                platform: "facebook".to_string(),
                message: "no managed pages for this user".to_string(),
            }
            .into());
        };

        Ok(PlatformAccountInfo {
            platform_account_id: page["id"].as_str().unwrap_or_default().to_string(),
            account_name: page["name"].as_str().unwrap_or("Facebook Page").to_string(),
            account_type: AccountKind::Page,
            avatar_url: page["picture"]["data"]["url"].as_str().map(String::from),
            page_access_token: page["access_token"].as_str().map(String::from),
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        content: &PlatformContent,
    ) -> Result<PublishResult> {
        let caption = content.full_caption();
        let (path, mut params): (String, Vec<(&str, String)>) =
            match (&content.media_url, content.media_type) {
                (Some(url), Some(PublishMediaType::Video)) => (
                    format!("{}/videos", content.account_id),
                    vec![("file_url", url.clone()), ("description", caption)],
                ),
                (Some(url), _) => (
                    format!("{}/photos", content.account_id),
                    vec![("url", url.clone()), ("caption", caption)],
                ),
                (None, _) => (
                    format!("{}/feed", content.account_id),
                    vec![("message", caption)],
                ),
            };
        params.push(("access_token", access_token.to_string()));

        let response = self
            .client
            .post(format!("{}/{}", GRAPH_BASE, path))
            .timeout(REQUEST_TIMEOUT)
            .form(&params)
            .send()
            .await
            .map_err(|e| PlatformError::Network {
                platform: "facebook".to_string(),
                message: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| PlatformError::Network {
            platform: "facebook".to_string(),
            message: e.to_string(),
        })?;

        if let Some(message) = body["error"]["message"].as_str() {
            return Err(PlatformError::Publishing {
                platform: "facebook".to_string(),
                message: message.to_string(),
            }
            .into());
        }

        let post_id = body["post_id"]
            .as_str()
            .or_else(|| body["id"].as_str())
            .ok_or_else(|| PlatformError::Publishing {
                platform: "facebook".to_string(),
                message: "no post id in publish response".to_string(),
            })?;

        Ok(PublishResult {
            platform_post_id: post_id.to_string(),
            platform_post_url: Some(format!("https://www.facebook.com/{}", post_id)),
        })
    }

    async fn post_metrics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> Result<PublicationMetrics> {
        let fields = "shares,reactions.summary(true),comments.summary(true),\
                      insights.metric(post_impressions,post_impressions_unique,post_video_views)";
        let body = self
            .graph_get(&format!("{}?fields={}", post_id, fields), access_token, metrics_error)
            .await?;

        let likes = body["reactions"]["summary"]["total_count"].as_i64().unwrap_or(0);
        let comments = body["comments"]["summary"]["total_count"].as_i64().unwrap_or(0);
        let shares = body["shares"]["count"].as_i64().unwrap_or(0);

        let mut impressions = 0;
        let mut reach = 0;
        let mut views = 0;
        if let Some(insights) = body["insights"]["data"].as_array() {
            for metric in insights {
                let value = metric["values"][0]["value"].as_i64().unwrap_or(0);
                match metric["name"].as_str().unwrap_or("") {
                    "post_impressions" => impressions = value,
                    "post_impressions_unique" => reach = value,
                    "post_video_views" => views = value,
                    _ => {}
                }
            }
        }
        if views == 0 {
            views = impressions;
        }

        let engagement_rate = if reach > 0 {
            (likes + comments + shares) as f64 / reach as f64 * 100.0
        } else {
            0.0
        };

        Ok(PublicationMetrics {
            views,
            likes,
            comments,
            shares,
            saves: 0,
            watch_time_seconds: 0,
            avg_watch_percent: 0.0,
            reach_unique: reach,
            impressions,
            engagement_rate,
            last_sync_at: Some(chrono::Utc::now().timestamp()),
        })
    }

    async fn account_metrics(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<AccountMetricsInfo> {
        let body = self
            .graph_get(
                &format!("{}?fields=followers_count,fan_count", account_id),
                access_token,
                metrics_error,
            )
            .await?;

        let followers = body["followers_count"]
            .as_i64()
            .or_else(|| body["fan_count"].as_i64())
            .unwrap_or(0);

        Ok(AccountMetricsInfo {
            followers,
            ..Default::default()
        })
    }

    /// Page feed listing, the discovery source for posts published outside
    /// this system.
    async fn recent_posts(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<RemotePost>> {
        let body = self
            .graph_get(
                &format!(
                    "{}/posts?fields=id,permalink_url,created_time&limit=25",
                    account_id
                ),
                access_token,
                metrics_error,
            )
            .await?;

        let mut posts = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for entry in data {
                let Some(id) = entry["id"].as_str() else { continue };
                let created_at = entry["created_time"]
                    .as_str()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.timestamp())
                    .unwrap_or(0);
                posts.push(RemotePost {
                    id: id.to_string(),
                    url: entry["permalink_url"].as_str().map(String::from),
                    created_at,
                });
            }
        }

        Ok(posts)
    }
}
