//! TikTok integration (Content Posting API v2)
//!
//! OAuth uses PKCE with S256. The code verifier has to survive the redirect
//! round trip, so it rides in the state string after a `|` separator and the
//! callback handler splits it back out before calling [`exchange_code_pkce`].
//! Publishing is video-only and uses PULL_FROM_URL, so the media URL must be
//! reachable by TikTok's fetcher.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::types::{AccountKind, PlatformKind, PublicationMetrics};

use super::{
    urlencode, AccountMetricsInfo, OAuthUrl, PlatformAccountInfo, PlatformContent,
    PublishMediaType, PublishResult, SocialPlatform, TokenPair,
};

const AUTH_BASE: &str = "https://www.tiktok.com/v2/auth/authorize/";
const API_BASE: &str = "https://open.tiktokapis.com/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SCOPES: [&str; 3] = ["user.info.basic", "user.info.stats", "video.publish"];

fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_verifier() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct TikTokPlatform {
    app: OAuthAppConfig,
    client: reqwest::Client,
}

impl TikTokPlatform {
    pub fn new(app: OAuthAppConfig) -> Self {
        Self {
            app,
            client: reqwest::Client::new(),
        }
    }

    fn network(&self, e: impl std::fmt::Display) -> PlatformError {
        PlatformError::Network {
            platform: "tiktok".to_string(),
            message: e.to_string(),
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenPair> {
        let response = self
            .client
            .post(format!("{}/oauth/token/", API_BASE))
            .timeout(REQUEST_TIMEOUT)
            .form(params)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        let access_token = body["access_token"].as_str().ok_or_else(|| {
            PlatformError::Authentication {
                platform: "tiktok".to_string(),
                message: body["error_description"]
                    .as_str()
                    .or_else(|| body["error"].as_str())
                    .unwrap_or("no access token in response")
                    .to_string(),
            }
        })?;

        Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: body["refresh_token"].as_str().map(String::from),
            expires_at: chrono::Utc::now().timestamp()
                + body["expires_in"].as_i64().unwrap_or(86400),
            scopes: body["scope"]
                .as_str()
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect()),
        })
    }

    /// Code exchange with the verifier recovered from the state string.
    pub async fn exchange_code_pkce(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenPair> {
        self.token_request(&[
            ("client_key", &self.app.client_id),
            ("client_secret", &self.app.client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ])
        .await
    }
}

#[async_trait]
impl SocialPlatform for TikTokPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::TikTok
    }

    fn auth_url(&self, user_id: &str, redirect_uri: &str) -> Result<OAuthUrl> {
        let nonce: u64 = rand::thread_rng().gen();
        let verifier = random_verifier();
        let state = format!("{:016x}:{}|{}", nonce, user_id, verifier);

        let url = format!(
            "{}?client_key={}&response_type=code&scope={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            AUTH_BASE,
            self.app.client_id,
            urlencode(&SCOPES.join(",")),
            urlencode(redirect_uri),
            urlencode(&state),
            code_challenge(&verifier),
        );

        Ok(OAuthUrl { url, state })
    }

    /// Plain exchange without a verifier. Callers that round-tripped the
    /// state should use [`SocialPlatform::exchange_code_with_verifier`].
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair> {
        self.token_request(&[
            ("client_key", &self.app.client_id),
            ("client_secret", &self.app.client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn exchange_code_with_verifier(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Result<TokenPair> {
        self.exchange_code_pkce(code, redirect_uri, verifier).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        self.token_request(&[
            ("client_key", &self.app.client_id),
            ("client_secret", &self.app.client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn fetch_account(&self, access_token: &str) -> Result<PlatformAccountInfo> {
        let response = self
            .client
            .get(format!(
                "{}/user/info/?fields=open_id,display_name,avatar_url",
                API_BASE
            ))
            .bearer_auth(access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;
        let user = &body["data"]["user"];

        let open_id = user["open_id"].as_str().ok_or_else(|| {
            PlatformError::Authentication {
                platform: "tiktok".to_string(),
                message: body["error"]["message"]
                    .as_str()
                    .unwrap_or("no user in response")
                    .to_string(),
            }
        })?;

        Ok(PlatformAccountInfo {
            platform_account_id: open_id.to_string(),
            account_name: user["display_name"]
                .as_str()
                .unwrap_or("TikTok Account")
                .to_string(),
            account_type: AccountKind::Profile,
            avatar_url: user["avatar_url"].as_str().map(String::from),
            page_access_token: None,
        })
    }

    /// Video-only. Anything without a video URL is rejected before the wire.
    async fn publish(
        &self,
        access_token: &str,
        content: &PlatformContent,
    ) -> Result<PublishResult> {
        let video_url = match (&content.media_url, content.media_type) {
            (Some(url), Some(PublishMediaType::Video)) => url,
            _ => {
                return Err(PlatformError::Publishing {
                    platform: "tiktok".to_string(),
                    message: "only video content can be published".to_string(),
                }
                .into())
            }
        };

        let request = json!({
            "post_info": {
                "title": content.full_caption(),
                "privacy_level": "PUBLIC_TO_EVERYONE",
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": video_url,
            },
        });

        let response = self
            .client
            .post(format!("{}/post/publish/video/init/", API_BASE))
            .bearer_auth(access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        if let Some(code) = body["error"]["code"].as_str() {
            if code != "ok" {
                return Err(PlatformError::Publishing {
                    platform: "tiktok".to_string(),
                    message: body["error"]["message"].as_str().unwrap_or(code).to_string(),
                }
                .into());
            }
        }

        let publish_id = body["data"]["publish_id"].as_str().ok_or_else(|| {
            PlatformError::Publishing {
                platform: "tiktok".to_string(),
                message: "no publish id in init response".to_string(),
            }
        })?;

        // The upload is asynchronous on TikTok's side; the publish id is the
        // only stable handle available at init time.
        Ok(PublishResult {
            platform_post_id: publish_id.to_string(),
            platform_post_url: None,
        })
    }

    async fn post_metrics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> Result<PublicationMetrics> {
        let request = json!({ "filters": { "video_ids": [post_id] } });

        let response = self
            .client
            .post(format!(
                "{}/video/query/?fields=id,view_count,like_count,comment_count,share_count",
                API_BASE
            ))
            .bearer_auth(access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;

        let video = body["data"]["videos"]
            .as_array()
            .and_then(|v| v.first())
            .ok_or_else(|| PlatformError::Metrics {
                platform: "tiktok".to_string(),
                message: body["error"]["message"]
                    .as_str()
                    .unwrap_or("video not found")
                    .to_string(),
            })?;

        let views = video["view_count"].as_i64().unwrap_or(0);
        let likes = video["like_count"].as_i64().unwrap_or(0);
        let comments = video["comment_count"].as_i64().unwrap_or(0);
        let shares = video["share_count"].as_i64().unwrap_or(0);

        let engagement_rate = if views > 0 {
            (likes + comments + shares) as f64 / views as f64 * 100.0
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
            reach_unique: views,
            impressions: views,
            engagement_rate,
            last_sync_at: Some(chrono::Utc::now().timestamp()),
        })
    }

    async fn account_metrics(
        &self,
        access_token: &str,
        _account_id: &str,
    ) -> Result<AccountMetricsInfo> {
        let response = self
            .client
            .get(format!(
                "{}/user/info/?fields=follower_count,likes_count,video_count",
                API_BASE
            ))
            .bearer_auth(access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let body: Value = response.json().await.map_err(|e| self.network(e))?;
        let user = &body["data"]["user"];

        Ok(AccountMetricsInfo {
            followers: user["follower_count"].as_i64().unwrap_or(0),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_challenge_is_s256_base64url() {
        // RFC 7636 appendix B test vector.
        let challenge = code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_auth_state_carries_verifier() {
        let platform = TikTokPlatform::new(OAuthAppConfig {
            client_id: "key".to_string(),
            client_secret: "secret".to_string(),
        });
        let oauth = platform
            .auth_url("user-1", "https://app.example/callback")
            .unwrap();

        let (prefix, verifier) = oauth.state.split_once('|').unwrap();
        assert!(prefix.ends_with(":user-1"));
        assert!(!verifier.is_empty());
        assert!(oauth.url.contains("code_challenge_method=S256"));
        assert!(oauth.url.contains(&code_challenge(verifier)));
    }

    #[tokio::test]
    async fn test_publish_rejects_non_video() {
        let platform = TikTokPlatform::new(OAuthAppConfig {
            client_id: "key".to_string(),
            client_secret: "secret".to_string(),
        });
        let content = PlatformContent {
            caption: "hi".to_string(),
            hashtags: vec![],
            media_url: Some("https://cdn.example/img.png".to_string()),
            media_type: Some(PublishMediaType::Image),
            account_id: "acct".to_string(),
        };
        let err = platform.publish("token", &content).await.unwrap_err();
        assert!(err.to_string().contains("only video"));
    }
}
