//! Account custody: OAuth connect/disconnect and the data-deletion webhook.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{ForgeError, Result};
use crate::platforms::{OAuthUrl, Publisher};
use crate::types::{Account, MonetizationTrack, PlatformKind};
use crate::vault::CredentialVault;

pub struct AccountService {
    db: Database,
    vault: CredentialVault,
    publisher: Arc<Publisher>,
    app_url: String,
    webhook_secret: Option<String>,
}

/// Answer for the platform's data-deletion callback. Always returned, even
/// when the deletion itself failed, because the calling platform retries on
/// anything else.
#[derive(Debug, Clone, Serialize)]
pub struct DataDeletionReceipt {
    pub url: String,
    pub confirmation_code: String,
}

impl AccountService {
    pub fn new(db: Database, vault: CredentialVault, publisher: Arc<Publisher>, config: &Config)
        -> Self
    {
        Self {
            db,
            vault,
            publisher,
            app_url: config.app_url.clone(),
            webhook_secret: config.security.webhook_secret.clone(),
        }
    }

    fn redirect_uri(&self, platform: PlatformKind) -> String {
        format!("{}/api/social/callback/{}", self.app_url, platform.as_str())
    }

    /// Step one of the connect flow: the redirect URL the user is sent to.
    pub fn begin_connect(&self, user_id: &str, platform: PlatformKind) -> Result<OAuthUrl> {
        self.publisher
            .get(platform)?
            .auth_url(user_id, &self.redirect_uri(platform))
    }

    /// Step two: exchange the callback code, resolve the external account,
    /// and store the encrypted credential. A page-scoped token takes
    /// precedence over the user token when the platform returns one.
    pub async fn complete_connect(
        &self,
        user_id: &str,
        platform: PlatformKind,
        code: &str,
        state: &str,
    ) -> Result<Account> {
        let platform_impl = self.publisher.get(platform)?;
        let redirect_uri = self.redirect_uri(platform);

        let tokens = match state.split_once('|') {
            Some((_, verifier)) => {
                platform_impl
                    .exchange_code_with_verifier(code, &redirect_uri, verifier)
                    .await?
            }
            None => platform_impl.exchange_code(code, &redirect_uri).await?,
        };

        let info = platform_impl.fetch_account(&tokens.access_token).await?;

        let stored_token = info
            .page_access_token
            .as_deref()
            .unwrap_or(&tokens.access_token);

        let account = Account {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            platform,
            platform_account_id: info.platform_account_id,
            account_name: info.account_name,
            account_type: info.account_type,
            avatar_url: info.avatar_url,
            access_token: self.vault.encrypt(stored_token)?,
            refresh_token: tokens
                .refresh_token
                .as_deref()
                .map(|t| self.vault.encrypt(t))
                .transpose()?,
            token_expires_at: tokens.expires_at,
            scopes: tokens.scopes,
            monetization: MonetizationTrack::for_platform(platform),
            is_active: true,
            connected_at: chrono::Utc::now().timestamp(),
        };

        // A reconnect keeps the existing row's id; hand back the stored row
        // so the caller never holds a handle that is not in the database.
        let stored_id = self.db.upsert_account(&account).await?;
        let stored = self
            .db
            .get_account(&stored_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Account".to_string()))?;

        tracing::info!(
            platform = platform.as_str(),
            account = %stored.account_name,
            "account connected"
        );
        Ok(stored)
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        self.db.list_accounts_for_user(user_id).await
    }

    /// Soft-delete; historical publications keep referencing the account.
    pub async fn disconnect(&self, user_id: &str, account_id: &str) -> Result<()> {
        if self.db.deactivate_account(account_id, user_id).await? {
            Ok(())
        } else {
            Err(ForgeError::NotFound("Account".to_string()))
        }
    }

    /// Platform-initiated data deletion. The `signed_request` body is
    /// `base64url(signature).base64url(payload)`; the signature is
    /// HMAC-SHA256 of the payload part. A confirmation receipt is always
    /// produced, even when deletion fails internally.
    pub async fn handle_data_deletion(
        &self,
        platform: PlatformKind,
        signed_request: &str,
    ) -> DataDeletionReceipt {
        let confirmation_code = Uuid::new_v4().to_string();
        let receipt = DataDeletionReceipt {
            url: format!(
                "{}/api/social/data-deletion?code={}",
                self.app_url, confirmation_code
            ),
            confirmation_code,
        };

        match self.delete_from_signed_request(platform, signed_request).await {
            Ok(deleted) => {
                tracing::info!(platform = platform.as_str(), deleted, "data deletion handled");
            }
            Err(e) => {
                tracing::error!(platform = platform.as_str(), error = %e, "data deletion failed");
            }
        }

        receipt
    }

    async fn delete_from_signed_request(
        &self,
        platform: PlatformKind,
        signed_request: &str,
    ) -> Result<u64> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            ForgeError::Validation("webhook secret is not configured".to_string())
        })?;

        let payload = verify_signed_request(signed_request, secret)?;
        let platform_user_id = payload["user_id"]
            .as_str()
            .ok_or_else(|| ForgeError::Validation("signed request has no user_id".to_string()))?;

        self.db
            .delete_accounts_by_platform_user(platform, platform_user_id)
            .await
    }
}

/// Verify a `signed_request` and return its decoded payload. Verification is
/// constant-time via the MAC itself.
pub fn verify_signed_request(signed_request: &str, secret: &str) -> Result<serde_json::Value> {
    let (sig_b64, payload_b64) = signed_request
        .split_once('.')
        .ok_or_else(|| ForgeError::Validation("malformed signed request".to_string()))?;

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64.trim_end_matches('='))
        .map_err(|_| ForgeError::Validation("malformed signed request".to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| ForgeError::Validation("invalid webhook secret".to_string()))?;
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| ForgeError::Validation("signed request signature mismatch".to_string()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .map_err(|_| ForgeError::Validation("malformed signed request".to_string()))?;

    serde_json::from_slice(&payload)
        .map_err(|_| ForgeError::Validation("signed request payload is not JSON".to_string()))
}
