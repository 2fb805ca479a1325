//! End-to-end flow over a real on-disk database: connect an account,
//! generate content, publish, schedule and sweep, then sync metrics.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use libforge::config::{Config, DatabaseConfig, MediaConfig, SecurityConfig};
use libforge::db::Database;
use libforge::generator::{ContentGenerator, GenerationRequest};
use libforge::platforms::mock::{MockConfig, MockPlatform};
use libforge::platforms::Publisher;
use libforge::providers::{ChatMessage, GenerationOptions, GenerationResult, TextEngine, TextProvider};
use libforge::service::{AccountService, MetricsService, PublishingService};
use libforge::types::{ContentStatus, ContentType, PlatformKind, PublicationStatus, Tone};
use libforge::vault::CredentialVault;

const KEY: &str = "an-adequately-long-key";

struct CannedProvider;

#[async_trait]
impl TextProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> libforge::Result<GenerationResult> {
        Ok(GenerationResult {
            content: r##"{"hook": "Wait for it", "caption": "A caption worth reading to the end!",
                "hashtags": ["#one", "#two", "#three", "#four", "#five"],
                "callToAction": "Follow for more", "overall": 70, "hookStrength": 70,
                "captionQuality": 70, "hashtagRelevance": 70, "estimatedReach": "medium",
                "suggestions": []}"##
                .to_string(),
            model: "canned-model".to_string(),
            provider: "canned".to_string(),
            tokens_used: 42,
        })
    }
}

fn config_for(temp: &TempDir) -> Config {
    Config {
        database: DatabaseConfig {
            path: temp
                .path()
                .join("forge.db")
                .to_string_lossy()
                .replace('\\', "/"),
        },
        security: SecurityConfig {
            encryption_key: KEY.to_string(),
            cron_secret: Some("cron-secret".to_string()),
            webhook_secret: None,
        },
        providers: Default::default(),
        platforms: Default::default(),
        media: MediaConfig::default(),
        app_url: "http://localhost:3000".to_string(),
    }
}

fn request() -> GenerationRequest {
    GenerationRequest {
        user_id: "user-1".to_string(),
        niche: "cooking".to_string(),
        tone: Tone::Entertainment,
        target_audience: "home cooks".to_string(),
        language: "en".to_string(),
        content_pillars: vec!["quick meals".to_string()],
        content_type: ContentType::Image,
        platforms: vec![PlatformKind::Facebook],
        topic: Some("15 minute dinners".to_string()),
        brand_voice: None,
    }
}

#[tokio::test]
async fn test_connect_generate_publish_sync() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_for(&temp);

    let db = Database::new(&config.database.path).await?;
    let vault = CredentialVault::new(KEY)?;
    let publisher = Arc::new(Publisher::empty().with_platform(Box::new(MockPlatform::new(
        MockConfig {
            followers: 600,
            ..MockConfig::for_kind(PlatformKind::Facebook)
        },
    ))));

    // Connect.
    let accounts = AccountService::new(db.clone(), CredentialVault::new(KEY)?, publisher.clone(), &config);
    let account = accounts
        .complete_connect("user-1", PlatformKind::Facebook, "auth-code", "state")
        .await?;
    assert!(account.is_active);

    // Generate.
    let generator = ContentGenerator::new(
        TextEngine::with_providers(vec![Box::new(CannedProvider)]),
        db.clone(),
    );
    let content = generator.generate(&request()).await?;
    assert_eq!(content.status, ContentStatus::Ready);
    assert_eq!(content.hook, "Wait for it");

    // Publish immediately.
    let publishing = PublishingService::new(db.clone(), vault, publisher.clone(), &config);
    let publication = publishing
        .publish_now("user-1", &content.id, &account.id)
        .await?;
    assert_eq!(publication.status, PublicationStatus::Published);
    assert!(publication.platform_post_id.is_some());

    // Sync metrics: the published post is tracked, followers land in the
    // daily snapshot and the monetization track.
    let metrics = MetricsService::new(db.clone(), CredentialVault::new(KEY)?, publisher);
    let report = metrics.sync_user("user-1").await?;
    assert!(report.failures.is_empty());
    assert!(report.synced >= 1);

    let stored = db.get_account(&account.id).await?.unwrap();
    assert_eq!(stored.monetization.current_followers, 600);

    Ok(())
}

#[tokio::test]
async fn test_schedule_and_sweep_across_restart() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_for(&temp);

    let db = Database::new(&config.database.path).await?;
    let publisher = Arc::new(Publisher::empty().with_platform(Box::new(MockPlatform::new(
        MockConfig::for_kind(PlatformKind::Facebook),
    ))));

    let accounts = AccountService::new(db.clone(), CredentialVault::new(KEY)?, publisher.clone(), &config);
    let account = accounts
        .complete_connect("user-1", PlatformKind::Facebook, "code", "state")
        .await?;

    let generator = ContentGenerator::new(
        TextEngine::with_providers(vec![Box::new(CannedProvider)]),
        db.clone(),
    );
    let content = generator.generate(&request()).await?;

    let publishing = PublishingService::new(
        db.clone(),
        CredentialVault::new(KEY)?,
        publisher.clone(),
        &config,
    );
    let scheduled = publishing
        .schedule(
            "user-1",
            &content.id,
            &account.id,
            chrono::Utc::now().timestamp() + 600,
        )
        .await?;

    // Not due yet.
    let report = publishing.sweep_due().await?;
    assert_eq!(report.due, 0);

    // Reopen the database, as a separate cron process would.
    drop(db);
    let db = Database::new(&config.database.path).await?;
    sqlx::query("UPDATE publications SET scheduled_at = ? WHERE id = ?")
        .bind(chrono::Utc::now().timestamp() - 10)
        .bind(&scheduled.id)
        .execute(db.pool())
        .await?;

    let publishing = PublishingService::new(db.clone(), CredentialVault::new(KEY)?, publisher, &config);
    let report = publishing.sweep_due().await?;
    assert_eq!(report.due, 1);
    assert_eq!(report.published, 1);

    let publication = db.get_publication(&scheduled.id, "user-1").await?.unwrap();
    assert_eq!(publication.status, PublicationStatus::Published);

    Ok(())
}
