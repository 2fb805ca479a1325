//! Service layer
//!
//! The operations the outside world calls, grouped the way the API routes
//! group them: account custody, the publication lifecycle, and metrics sync.
//! Everything returns domain errors; [`ApiResponse`] is the one place they
//! are flattened into the external envelope.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::config::SecurityConfig;
use crate::error::{ForgeError, Result};

pub mod accounts;
pub mod metrics;
pub mod publishing;

pub use accounts::AccountService;
pub use metrics::MetricsService;
pub use publishing::PublishingService;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// The success/error envelope every external operation answers with.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &ForgeError) -> Self {
        let message = if error.is_internal() {
            tracing::error!(error = %error, "internal error masked at boundary");
            "Internal server error".to_string()
        } else {
            error.to_string()
        };
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: error.code().to_string(),
                message,
            }),
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

/// Gate for cron-invoked operations: the caller must present the configured
/// shared secret. An unconfigured secret rejects everything.
pub fn verify_cron_secret(security: &SecurityConfig, provided: Option<&str>) -> Result<()> {
    let expected = security
        .cron_secret
        .as_deref()
        .ok_or_else(|| ForgeError::Validation("cron secret is not configured".to_string()))?;

    match provided {
        Some(p) if secrets_equal(expected, p) => Ok(()),
        _ => Err(ForgeError::Validation("invalid cron secret".to_string())),
    }
}

/// Compares shared secrets without leaking the mismatch position through
/// timing. Each side keys an HMAC over a fixed message and the tags are
/// checked with the constant-time verifier.
fn secrets_equal(expected: &str, provided: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;
    const GATE: &[u8] = b"socialforge-cron-gate";

    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(GATE);
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = HmacSha256::new_from_slice(provided.as_bytes()) else {
        return false;
    };
    provided_mac.update(GATE);
    provided_mac.verify_slice(&expected_tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, DbError};

    fn security(secret: Option<&str>) -> SecurityConfig {
        SecurityConfig {
            encryption_key: "0123456789abcdef".to_string(),
            cron_secret: secret.map(String::from),
            webhook_secret: None,
        }
    }

    #[test]
    fn test_domain_error_keeps_code_and_message() {
        let response: ApiResponse<()> =
            ApiResponse::err(&ForgeError::NotFound("Publication".to_string()));
        let error = response.error.unwrap();
        assert_eq!(error.code, "NOT_FOUND");
        assert_eq!(error.message, "Publication not found");
    }

    #[test]
    fn test_credential_error_is_not_masked() {
        let response: ApiResponse<()> =
            ApiResponse::err(&ForgeError::Credential(CredentialError::DecryptionFailed));
        let error = response.error.unwrap();
        assert_eq!(error.code, "CREDENTIAL_ERROR");
        assert!(error.message.contains("Decryption failed"));
    }

    #[test]
    fn test_internal_error_is_masked() {
        let inner = DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "secret path /var/db",
        ));
        let response: ApiResponse<()> = ApiResponse::err(&ForgeError::Database(inner));
        let error = response.error.unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert_eq!(error.message, "Internal server error");
        assert!(!error.message.contains("/var/db"));
    }

    #[test]
    fn test_cron_secret_gate() {
        assert!(verify_cron_secret(&security(Some("s3cret")), Some("s3cret")).is_ok());
        assert!(verify_cron_secret(&security(Some("s3cret")), Some("wrong")).is_err());
        assert!(verify_cron_secret(&security(Some("s3cret")), None).is_err());
        // Same length, same prefix; only the tag comparison can tell.
        assert!(verify_cron_secret(&security(Some("s3cret")), Some("s3creT")).is_err());
        assert!(verify_cron_secret(&security(Some("s3cret")), Some("s3cret-extra")).is_err());
        // Unconfigured secret fails closed.
        assert!(verify_cron_secret(&security(None), Some("anything")).is_err());
    }
}
