//! Instagram integration (Graph API, business accounts)
//!
//! Publishing is the two-step container flow: create a media container, then
//! publish it by creation id. Connecting resolves the IG business account
//! linked to the user's Facebook Page.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::types::{AccountKind, PlatformKind, PublicationMetrics};

use super::{
    AccountMetricsInfo, OAuthUrl, PlatformAccountInfo, PlatformContent, PublishMediaType,
    PublishResult, SocialPlatform, TokenPair,
};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const AUTH_BASE: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SCOPES: [&str; 4] = [
    "instagram_basic",
    "instagram_content_publish",
    "instagram_manage_insights",
    "pages_show_list",
];

pub struct InstagramPlatform {
    app: OAuthAppConfig,
    client: reqwest::Client,
}

impl InstagramPlatform {
    pub fn new(app: OAuthAppConfig) -> Self {
        Self {
            app,
            client: reqwest::Client::new(),
        }
    }

    fn network(&self, e: impl std::fmt::Display) -> PlatformError {
        PlatformError::Network {
            platform: "instagram".to_string(),
            message: e.to_string(),
        }
    }

    async fn graph_get(&self, path_and_query: &str, access_token: &str) -> Result<Value> {
        let sep = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}/{}{}access_token={}",
            GRAPH_BASE, path_and_query, sep, access_token
        );

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        if let Some(message) = body["error"]["message"].as_str() {
            return Err(PlatformError::Metrics {
                platform: "instagram".to_string(),
                message: message.to_string(),
            }
            .into());
        }

        Ok(body)
    }

    async fn graph_post(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/{}", GRAPH_BASE, path))
            .timeout(REQUEST_TIMEOUT)
            .form(params)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        if let Some(message) = body["error"]["message"].as_str() {
            return Err(PlatformError::Publishing {
                platform: "instagram".to_string(),
                message: message.to_string(),
            }
            .into());
        }

        Ok(body)
    }
}

#[async_trait]
impl SocialPlatform for InstagramPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Instagram
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
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        let access_token = body["access_token"].as_str().ok_or_else(|| {
            PlatformError::Authentication {
                platform: "instagram".to_string(),
                message: body["error"]["message"]
                    .as_str()
                    .unwrap_or("no access token in response")
                    .to_string(),
            }
        })?;

        Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: chrono::Utc::now().timestamp()
                + body["expires_in"].as_i64().unwrap_or(60 * 24 * 3600),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Walk pages until one has a linked IG business account.
    async fn fetch_account(&self, access_token: &str) -> Result<PlatformAccountInfo> {
        let body = self
            .graph_get(
                "me/accounts?fields=instagram_business_account{id,username,profile_picture_url}",
                access_token,
            )
            .await?;

        let ig = body["data"]
            .as_array()
            .and_then(|pages| {
                pages
                    .iter()
                    .find(|p| p["instagram_business_account"]["id"].is_string())
            })
            .map(|p| p["instagram_business_account"].clone());

        let Some(ig) = ig else {
            return Err(PlatformError::Authentication {
                platform: "instagram".to_string(),
                message: "no instagram business account linked to any page".to_string(),
            }
            .into());
        };

        Ok(PlatformAccountInfo {
            platform_account_id: ig["id"].as_str().unwrap_or_default().to_string(),
            account_name: ig["username"].as_str().unwrap_or("Instagram").to_string(),
            account_type: AccountKind::Business,
            avatar_url: ig["profile_picture_url"].as_str().map(String::from),
            page_access_token: None,
        })
    }

    /// Container create then publish. Both steps report errors through the
    /// same Graph error envelope.
    async fn publish(
        &self,
        access_token: &str,
        content: &PlatformContent,
    ) -> Result<PublishResult> {
        let Some(media_url) = &content.media_url else {
            return Err(PlatformError::Publishing {
                platform: "instagram".to_string(),
                message: "media is required".to_string(),
            }
            .into());
        };

        let mut params: Vec<(&str, String)> = vec![
            ("caption", content.full_caption()),
            ("access_token", access_token.to_string()),
        ];
        match content.media_type {
            Some(PublishMediaType::Video) => {
                params.push(("media_type", "REELS".to_string()));
                params.push(("video_url", media_url.clone()));
            }
            _ => params.push(("image_url", media_url.clone())),
        }

        let container = self
            .graph_post(&format!("{}/media", content.account_id), &params)
            .await?;
        let creation_id = container["id"].as_str().ok_or_else(|| {
            PlatformError::Publishing {
                platform: "instagram".to_string(),
                message: "no container id in response".to_string(),
            }
        })?;

        let published = self
            .graph_post(
                &format!("{}/media_publish", content.account_id),
                &[
                    ("creation_id", creation_id.to_string()),
                    ("access_token", access_token.to_string()),
                ],
            )
            .await?;

        let post_id = published["id"].as_str().ok_or_else(|| {
            PlatformError::Publishing {
                platform: "instagram".to_string(),
                message: "no media id in publish response".to_string(),
            }
        })?;

        Ok(PublishResult {
            platform_post_id: post_id.to_string(),
            platform_post_url: None,
        })
    }

    async fn post_metrics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> Result<PublicationMetrics> {
        let body = self
            .graph_get(
                &format!(
                    "{}/insights?metric=impressions,reach,likes,comments,shares,saved",
                    post_id
                ),
                access_token,
            )
            .await?;

        let mut metrics = PublicationMetrics::default();
        if let Some(data) = body["insights"]["data"].as_array().or(body["data"].as_array()) {
            for metric in data {
                let value = metric["values"][0]["value"].as_i64().unwrap_or(0);
                match metric["name"].as_str().unwrap_or("") {
                    "impressions" => metrics.impressions = value,
                    "reach" => metrics.reach_unique = value,
                    "likes" => metrics.likes = value,
                    "comments" => metrics.comments = value,
                    "shares" => metrics.shares = value,
                    "saved" => metrics.saves = value,
                    _ => {}
                }
            }
        }

        metrics.views = metrics.impressions;
        if metrics.reach_unique > 0 {
            metrics.engagement_rate = (metrics.likes
                + metrics.comments
                + metrics.shares
                + metrics.saves) as f64
                / metrics.reach_unique as f64
                * 100.0;
        }
        metrics.last_sync_at = Some(chrono::Utc::now().timestamp());

        Ok(metrics)
    }

    async fn account_metrics(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<AccountMetricsInfo> {
        let body = self
            .graph_get(
                &format!("{}?fields=followers_count", account_id),
                access_token,
            )
            .await?;

        Ok(AccountMetricsInfo {
            followers: body["followers_count"].as_i64().unwrap_or(0),
            ..Default::default()
        })
    }
}
