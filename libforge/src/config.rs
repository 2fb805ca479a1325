//! Configuration management for SocialForge
//!
//! All secrets (provider API keys, the symmetric encryption key, per-platform
//! OAuth credentials) live in one `Config` struct that is built once at
//! startup and passed by reference into the orchestrators. Nothing reads the
//! process environment after load, so tests can substitute arbitrary
//! provider lists.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    /// Public base URL, used to build OAuth redirect URIs and webhook links.
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Symmetric key for credential encryption at rest.
    pub encryption_key: String,
    /// Shared secret expected by cron-invoked operations.
    pub cron_secret: Option<String>,
    /// Secret used to verify platform-signed webhook payloads.
    pub webhook_secret: Option<String>,
}

/// API keys for the text-generation fallback chain and the image waterfall.
/// Only providers with a key present are placed in the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub groq_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub together_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub facebook: Option<OAuthAppConfig>,
    pub tiktok: Option<OAuthAppConfig>,
    pub instagram: Option<OAuthAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// ffmpeg binary used for image+voiceover video synthesis.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    /// Optional TTF/OTF font for the hook-text overlay. When absent the
    /// overlay step is skipped (it is cosmetic only).
    pub overlay_font: Option<String>,
    /// Directory where synthesized media files are written. They are served
    /// under `{app_url}/media/`. Defaults to the platform data dir.
    pub media_dir: Option<String>,
    /// edge-tts compatible binary used for voiceover synthesis. When absent,
    /// scripted content is generated without audio.
    pub tts_path: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            overlay_font: None,
            media_dir: None,
            tts_path: None,
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    pub fn oauth_app(&self, platform: crate::types::PlatformKind) -> Result<&OAuthAppConfig> {
        use crate::types::PlatformKind;
        let app = match platform {
            PlatformKind::Facebook => self.platforms.facebook.as_ref(),
            PlatformKind::TikTok => self.platforms.tiktok.as_ref(),
            PlatformKind::Instagram => self.platforms.instagram.as_ref(),
        };
        app.ok_or_else(|| {
            ConfigError::MissingField(format!("platforms.{}", platform.as_str())).into()
        })
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SOCIALFORGE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("socialforge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
            [database]
            path = "/tmp/forge.db"

            [security]
            encryption_key = "0123456789abcdef"

            [providers]
            groq_api_key = "gk_test"

            [platforms.facebook]
            client_id = "fb-id"
            client_secret = "fb-secret"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/forge.db");
        assert_eq!(config.providers.groq_api_key.as_deref(), Some("gk_test"));
        assert!(config.providers.deepseek_api_key.is_none());
        assert!(config.security.cron_secret.is_none());
        assert_eq!(config.app_url, "http://localhost:3000");
        assert_eq!(config.media.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_missing_oauth_app_is_config_error() {
        let toml_str = r#"
            [database]
            path = ":memory:"

            [security]
            encryption_key = "0123456789abcdef"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let err = config.oauth_app(crate::types::PlatformKind::TikTok);
        assert!(err.is_err());
    }
}
