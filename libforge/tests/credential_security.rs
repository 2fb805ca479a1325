//! Credential custody under failure: wrong keys and tampered ciphertexts
//! must fail closed, and a dispatch that cannot decrypt its token must end
//! as a terminal `failed` publication, never a silent publish.

use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

use libforge::config::{Config, DatabaseConfig, MediaConfig, SecurityConfig};
use libforge::db::Database;
use libforge::platforms::mock::{MockConfig, MockPlatform};
use libforge::platforms::Publisher;
use libforge::service::{AccountService, PublishingService};
use libforge::types::{
    ContentArtifact, ContentStatus, ContentType, GenerationInfo, PlatformKind, PublicationStatus,
};
use libforge::vault::CredentialVault;

const KEY: &str = "an-adequately-long-key";

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
            cron_secret: None,
            webhook_secret: None,
        },
        providers: Default::default(),
        platforms: Default::default(),
        media: MediaConfig::default(),
        app_url: "http://localhost:3000".to_string(),
    }
}

fn ready_content(user_id: &str) -> ContentArtifact {
    ContentArtifact {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        content_type: ContentType::Image,
        status: ContentStatus::Ready,
        script: None,
        hook: "Hook".to_string(),
        caption: "Caption".to_string(),
        hashtags: vec![],
        call_to_action: "Go".to_string(),
        media: vec![],
        voiceover: None,
        subtitles: None,
        variants: vec![],
        generation: GenerationInfo {
            provider: "test".to_string(),
            model: "test".to_string(),
            tokens_used: 0,
        },
        quality: None,
        created_at: chrono::Utc::now().timestamp(),
    }
}

#[test]
fn test_wrong_key_cannot_read_stored_token() {
    let vault = CredentialVault::new(KEY).unwrap();
    let ciphertext = vault.encrypt("page-token").unwrap();

    let other = CredentialVault::new("a-different-long-key").unwrap();
    let err = other.decrypt(&ciphertext).unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL_ERROR");
}

#[tokio::test]
async fn test_tampered_token_fails_dispatch_terminally() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_for(&temp);
    let db = Database::new(&config.database.path).await?;

    let mock = MockPlatform::new(MockConfig::for_kind(PlatformKind::Facebook));
    let calls = mock.calls();
    let publisher = Arc::new(Publisher::empty().with_platform(Box::new(mock)));

    let accounts = AccountService::new(
        db.clone(),
        CredentialVault::new(KEY)?,
        publisher.clone(),
        &config,
    );
    let account = accounts
        .complete_connect("user-1", PlatformKind::Facebook, "code", "state")
        .await?;

    // Corrupt the stored ciphertext in place.
    let mut corrupted = account.clone();
    corrupted.access_token = {
        let mut t = account.access_token.clone();
        t.pop();
        t.push('A');
        t
    };
    db.upsert_account(&corrupted).await?;

    let content = ready_content("user-1");
    db.create_content(&content).await?;

    let publishing = PublishingService::new(db.clone(), CredentialVault::new(KEY)?, publisher, &config);
    let err = publishing
        .publish_now("user-1", &content.id, &account.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL_ERROR");

    // The platform was never reached and the record is terminally failed.
    assert_eq!(calls.lock().unwrap().publish, 0);
    let publications = db.list_publications_for_user("user-1").await?;
    assert_eq!(publications[0].status, PublicationStatus::Failed);
    assert!(publications[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Decryption failed"));

    Ok(())
}
