//! Publication lifecycle: immediate publish, scheduling, dispatch, cancel,
//! and the periodic sweep.
//!
//! Dispatch is guarded by a conditional status update (`scheduled`/`queued`
//! to `publishing`) so a sweep racing a manual publish dispatches each record
//! at most once. Failure is terminal; re-dispatch is an explicit user action.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::error::{ForgeError, Result};
use crate::media::{MediaStore, VideoSynthesizer};
use crate::platforms::{PlatformContent, PublishMediaType, Publisher};
use crate::types::{
    ContentArtifact, ContentStatus, MediaType, PlatformKind, Publication, PublicationStatus,
};
use crate::vault::CredentialVault;

/// Minimum lead time for a scheduled publication.
pub const MIN_SCHEDULE_LEAD_SECS: i64 = 5 * 60;

/// Batch size of one sweep pass.
pub const SWEEP_BATCH_SIZE: i64 = 10;

pub struct PublishingService {
    db: Database,
    vault: CredentialVault,
    publisher: Arc<Publisher>,
    synthesizer: VideoSynthesizer,
    store: MediaStore,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SweepReport {
    pub due: usize,
    pub published: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl PublishingService {
    pub fn new(db: Database, vault: CredentialVault, publisher: Arc<Publisher>, config: &Config)
        -> Self
    {
        Self {
            db,
            vault,
            publisher,
            synthesizer: VideoSynthesizer::new(&config.media),
            store: MediaStore::from_config(config),
        }
    }

    /// Create a queued publication and dispatch it synchronously.
    pub async fn publish_now(
        &self,
        user_id: &str,
        content_id: &str,
        account_id: &str,
    ) -> Result<Publication> {
        let account = self
            .db
            .get_account_owned(account_id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Account".to_string()))?;
        self.db
            .get_content(content_id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Content".to_string()))?;

        let publication = Publication::new(
            user_id.to_string(),
            Some(content_id.to_string()),
            account_id.to_string(),
            account.platform,
            PublicationStatus::Queued,
            None,
        );
        self.db.create_publication(&publication).await?;

        self.dispatch(&publication.id).await?;

        self.db
            .get_publication(&publication.id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Publication".to_string()))
    }

    /// Store a future publication. The schedule time must be at least five
    /// minutes out; the content mirrors to `scheduled`.
    pub async fn schedule(
        &self,
        user_id: &str,
        content_id: &str,
        account_id: &str,
        scheduled_at: i64,
    ) -> Result<Publication> {
        let now = chrono::Utc::now().timestamp();
        if scheduled_at < now + MIN_SCHEDULE_LEAD_SECS {
            return Err(ForgeError::Validation(
                "schedule time must be at least 5 minutes in the future".to_string(),
            ));
        }

        let account = self
            .db
            .get_account_owned(account_id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Account".to_string()))?;
        let content = self
            .db
            .get_content(content_id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Content".to_string()))?;

        let publication = Publication::new(
            user_id.to_string(),
            Some(content_id.to_string()),
            account_id.to_string(),
            account.platform,
            PublicationStatus::Scheduled,
            Some(scheduled_at),
        );
        self.db.create_publication(&publication).await?;
        self.db
            .update_content_status(&content.id, ContentStatus::Scheduled)
            .await?;

        Ok(publication)
    }

    /// Cancel a still-scheduled publication. The content reverts to `ready`
    /// when no other scheduled publication references it.
    pub async fn cancel(&self, user_id: &str, publication_id: &str) -> Result<()> {
        let publication = self
            .db
            .get_publication(publication_id, user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Publication".to_string()))?;

        if !self.db.cas_cancel_scheduled(publication_id, user_id).await? {
            return Err(ForgeError::Validation(
                "only scheduled publications can be cancelled".to_string(),
            ));
        }

        if let Some(content_id) = &publication.content_id {
            if self.db.count_scheduled_for_content(content_id).await? == 0 {
                self.db
                    .update_content_status(content_id, ContentStatus::Ready)
                    .await?;
            }
        }

        Ok(())
    }

    /// Re-queue a failed publication and dispatch it again.
    pub async fn retry(&self, user_id: &str, publication_id: &str) -> Result<()> {
        if !self.db.cas_requeue_failed(publication_id, user_id).await? {
            return Err(ForgeError::Validation(
                "only failed publications can be retried".to_string(),
            ));
        }
        self.dispatch(publication_id).await
    }

    /// Dispatch one publication end to end. Losing the CAS race is not an
    /// error; the record is simply already taken.
    pub async fn dispatch(&self, publication_id: &str) -> Result<()> {
        if !self.db.cas_mark_publishing(publication_id).await? {
            tracing::debug!(publication = publication_id, "dispatch skipped, already taken");
            return Ok(());
        }

        match self.dispatch_inner(publication_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.db.mark_failed(publication_id, &e.to_string()).await?;
                tracing::warn!(publication = publication_id, error = %e, "dispatch failed");
                Err(e)
            }
        }
    }

    async fn dispatch_inner(&self, publication_id: &str) -> Result<()> {
        let publication = self
            .db
            .get_publication_any(publication_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Publication".to_string()))?;

        let account = self
            .db
            .get_account(&publication.account_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Account".to_string()))?;
        if !account.is_active {
            return Err(ForgeError::Validation(
                "account is disconnected".to_string(),
            ));
        }

        let content_id = publication.content_id.as_deref().ok_or_else(|| {
            ForgeError::Validation("publication has no content to dispatch".to_string())
        })?;
        let content = self
            .db
            .get_content(content_id, &publication.user_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound("Content".to_string()))?;

        let token = self.vault.decrypt(&account.access_token)?;

        let platform_content = self
            .build_platform_content(&content, publication.platform, &account.platform_account_id)
            .await;

        let platform_impl = self.publisher.get(publication.platform)?;
        let result = platform_impl.publish(&token, &platform_content).await?;

        let now = chrono::Utc::now().timestamp();
        self.db
            .mark_published(
                publication_id,
                &result.platform_post_id,
                result.platform_post_url.as_deref(),
                now,
            )
            .await?;
        self.db
            .update_content_status(&content.id, ContentStatus::Published)
            .await?;

        tracing::info!(
            publication = publication_id,
            platform = publication.platform.as_str(),
            post_id = %result.platform_post_id,
            "published"
        );
        Ok(())
    }

    /// Select the platform variant (primary caption as fallback) and resolve
    /// the media to post. An image with a voiceover is upgraded to a
    /// synthesized video; synthesis failure falls back to the image.
    async fn build_platform_content(
        &self,
        content: &ContentArtifact,
        platform: PlatformKind,
        platform_account_id: &str,
    ) -> PlatformContent {
        let (caption, hashtags) = match content.variant_for(platform) {
            Some(variant) => (variant.caption.clone(), variant.hashtags.clone()),
            None => (content.caption.clone(), content.hashtags.clone()),
        };

        let video = content
            .media
            .iter()
            .find(|m| m.media_type == MediaType::Video);
        let image = content
            .media
            .iter()
            .find(|m| m.media_type == MediaType::Image);

        let (mut media_url, mut media_type) = match (video, image) {
            (Some(v), _) => (Some(v.url.clone()), Some(PublishMediaType::Video)),
            (None, Some(i)) => (Some(i.url.clone()), Some(PublishMediaType::Image)),
            (None, None) => (None, None),
        };

        if media_type == Some(PublishMediaType::Image) {
            if let (Some(image_url), Some(voiceover)) = (&media_url, &content.voiceover) {
                match self.synthesize_video(image_url, &voiceover.url).await {
                    Ok(url) => {
                        media_url = Some(url);
                        media_type = Some(PublishMediaType::Video);
                    }
                    Err(e) => {
                        tracing::warn!(
                            content = %content.id,
                            error = %e,
                            "video synthesis failed, publishing the image"
                        );
                    }
                }
            }
        }

        PlatformContent {
            caption,
            hashtags,
            media_url,
            media_type,
            account_id: platform_account_id.to_string(),
        }
    }

    async fn synthesize_video(&self, image_url: &str, audio_url: &str) -> Result<String> {
        let bytes = self
            .synthesizer
            .create_video_from_image_and_audio(image_url, audio_url)
            .await?;
        self.store.store(&bytes, "mp4")
    }

    /// One sweep pass: dispatch up to [`SWEEP_BATCH_SIZE`] due publications
    /// sequentially. Individual failures are collected, never propagated.
    pub async fn sweep_due(&self) -> Result<SweepReport> {
        let now = chrono::Utc::now().timestamp();
        let due = self.db.list_due_publications(now, SWEEP_BATCH_SIZE).await?;

        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        for publication in due {
            match self.dispatch(&publication.id).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", publication.id, e));
                }
            }
        }

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                published = report.published,
                failed = report.failed,
                "sweep finished"
            );
        }
        Ok(report)
    }
}
