//! Error types for SocialForge

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ForgeError {
    /// Stable machine-readable code used in the external response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::Config(_) => "CONFIG_ERROR",
            ForgeError::Database(_) => "INTERNAL_ERROR",
            ForgeError::Provider(_) => "PROVIDER_ERROR",
            ForgeError::Platform(_) => "PLATFORM_ERROR",
            ForgeError::Credential(_) => "CREDENTIAL_ERROR",
            ForgeError::Validation(_) => "VALIDATION_ERROR",
            ForgeError::RateLimit(_) => "RATE_LIMIT_ERROR",
            ForgeError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Internal errors are masked with a generic message at the boundary;
    /// domain errors keep their specific text.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ForgeError::Database(_) | ForgeError::Config(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A single generation provider (text or image tier) failed, or every
/// provider in a tier was exhausted.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider {provider} failed: {reason}")]
    Attempt { provider: String, reason: String },

    #[error("All providers failed: {0}")]
    Exhausted(String),

    #[error("No providers configured: {0}")]
    NoneConfigured(String),
}

impl ProviderError {
    /// Build the aggregate exhaustion error from every recorded attempt,
    /// naming each provider and its failure reason.
    pub fn exhausted(attempts: &[(String, String)]) -> Self {
        let detail = attempts
            .iter()
            .map(|(name, reason)| format!("{}: {}", name, reason))
            .collect::<Vec<_>>()
            .join("; ");
        ProviderError::Exhausted(detail)
    }
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("[{platform}] authentication failed: {message}")]
    Authentication { platform: String, message: String },

    #[error("[{platform}] publishing failed: {message}")]
    Publishing { platform: String, message: String },

    #[error("[{platform}] metrics fetch failed: {message}")]
    Metrics { platform: String, message: String },

    #[error("[{platform}] network error: {message}")]
    Network { platform: String, message: String },

    #[error("[{platform}] {message}")]
    NotSupported { platform: String, message: String },
}

impl PlatformError {
    pub fn platform(&self) -> &str {
        match self {
            PlatformError::Authentication { platform, .. }
            | PlatformError::Publishing { platform, .. }
            | PlatformError::Metrics { platform, .. }
            | PlatformError::Network { platform, .. }
            | PlatformError::NotSupported { platform, .. } => platform,
        }
    }
}

/// Credential custody failures are always fatal for the operation that hit
/// them; a missing or undecryptable token is never treated as "no token".
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("Decryption failed: ciphertext is corrupted or the key is wrong")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Encryption key too weak (minimum {0} characters)")]
    WeakKey(usize),

    #[error("No credential stored for account {0}")]
    Missing(String),
}
