//! Metrics synchronization: feed discovery, per-post metric refresh, daily
//! aggregation, and the monetization update.
//!
//! Both discovery and sync are idempotent and safe to re-run. One post's
//! failure never aborts its siblings; failures are collected into the report.

use serde::Serialize;
use std::sync::Arc;

use crate::db::Database;
use crate::error::{ForgeError, Result};
use crate::monetization;
use crate::platforms::Publisher;
use crate::types::{
    Account, AccountSnapshot, DailySnapshot, Publication, PublicationStatus,
};
use crate::vault::CredentialVault;

/// Look-back window for per-post metric refresh.
const SYNC_LOOKBACK_DAYS: i64 = 90;

pub struct MetricsService {
    db: Database,
    vault: CredentialVault,
    publisher: Arc<Publisher>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SyncReport {
    pub discovered: usize,
    pub synced: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CronSyncReport {
    pub accounts: usize,
    pub discovered: usize,
    pub synced: usize,
    pub failures: Vec<String>,
}

impl MetricsService {
    pub fn new(db: Database, vault: CredentialVault, publisher: Arc<Publisher>) -> Self {
        Self {
            db,
            vault,
            publisher,
        }
    }

    /// Walk the platform feed and register any post we are not tracking yet
    /// as a `published` publication without a content link. Platforms without
    /// a feed contribute nothing.
    async fn discover(&self, account: &Account, token: &str) -> Result<usize> {
        let platform_impl = self.publisher.get(account.platform)?;

        let posts = match platform_impl
            .recent_posts(token, &account.platform_account_id)
            .await
        {
            Ok(posts) => posts,
            Err(ForgeError::Platform(crate::error::PlatformError::NotSupported { .. })) => {
                return Ok(0)
            }
            Err(e) => return Err(e),
        };

        let mut discovered = 0;
        for post in posts {
            if self
                .db
                .publication_exists_for_platform_post(&account.id, &post.id)
                .await?
            {
                continue;
            }

            let mut publication = Publication::new(
                account.user_id.clone(),
                None,
                account.id.clone(),
                account.platform,
                PublicationStatus::Published,
                None,
            );
            publication.platform_post_id = Some(post.id.clone());
            publication.platform_post_url = post.url.clone();
            publication.published_at = Some(post.created_at);
            self.db.create_publication(&publication).await?;
            discovered += 1;
        }

        if discovered > 0 {
            tracing::info!(
                account = %account.account_name,
                discovered,
                "feed discovery registered new posts"
            );
        }
        Ok(discovered)
    }

    /// Full sync for one account: discovery, per-post metric refresh within
    /// the look-back window, daily aggregation, monetization update.
    pub async fn sync_account(&self, account: &Account) -> Result<SyncReport> {
        let token = self.vault.decrypt(&account.access_token)?;
        let platform_impl = self.publisher.get(account.platform)?;

        let mut report = SyncReport::default();

        match self.discover(account, &token).await {
            Ok(n) => report.discovered = n,
            Err(e) => report.failures.push(format!("discovery: {}", e)),
        }

        let since = chrono::Utc::now().timestamp() - SYNC_LOOKBACK_DAYS * 86_400;
        let publications = self.db.list_published_since(&account.id, since).await?;

        for publication in &publications {
            let Some(post_id) = publication.platform_post_id.as_deref() else {
                continue;
            };
            match platform_impl.post_metrics(&token, post_id).await {
                Ok(metrics) => {
                    self.db
                        .update_publication_metrics(&publication.id, &metrics)
                        .await?;
                    report.synced += 1;
                }
                Err(e) => {
                    report.failures.push(format!("{}: {}", post_id, e));
                }
            }
        }

        if let Err(e) = self.aggregate(account, &token, platform_impl).await {
            report.failures.push(format!("aggregation: {}", e));
        }

        Ok(report)
    }

    /// Roll today's totals into the daily snapshot, push the bounded account
    /// snapshot, and refresh the monetization track.
    async fn aggregate(
        &self,
        account: &Account,
        token: &str,
        platform_impl: &dyn crate::platforms::SocialPlatform,
    ) -> Result<()> {
        let aggregates = self.db.aggregate_account_metrics(&account.id).await?;

        let followers = match platform_impl
            .account_metrics(token, &account.platform_account_id)
            .await
        {
            Ok(info) => info.followers,
            Err(e) => {
                tracing::warn!(account = %account.account_name, error = %e,
                    "account metrics unavailable, keeping last known followers");
                account.monetization.current_followers
            }
        };

        let previous = self.db.get_account_snapshots(&account.id).await?;
        let followers_growth = previous
            .first()
            .map(|s| followers - s.followers)
            .unwrap_or(0);

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let snapshot = DailySnapshot {
            account_id: account.id.clone(),
            date: today.clone(),
            followers,
            followers_growth,
            total_views: aggregates.total_views,
            total_watch_minutes: aggregates.total_watch_minutes,
            avg_engagement_rate: aggregates.avg_engagement_rate,
            posts_published: aggregates.posts_published,
            by_content_type: aggregates.by_content_type.clone(),
        };
        self.db.upsert_daily_snapshot(&snapshot).await?;

        self.db
            .push_account_snapshot(
                &account.id,
                &AccountSnapshot {
                    date: today,
                    followers,
                    views: aggregates.total_views,
                    watch_minutes: aggregates.total_watch_minutes,
                    engagement_rate: aggregates.avg_engagement_rate,
                },
            )
            .await?;

        let mut track = account.monetization.clone();
        track.current_followers = followers;
        track.current_views_30d = aggregates.total_views;
        track.current_watch_minutes_60d = aggregates.total_watch_minutes;
        track.last_sync_at = Some(chrono::Utc::now().timestamp());

        let window = self.db.get_account_snapshots(&account.id).await?;
        let projection = monetization::project(
            account.platform,
            &track,
            &window,
            chrono::Utc::now().date_naive(),
        );
        track.status = projection.status;

        self.db
            .update_account_monetization(&account.id, &track)
            .await?;
        Ok(())
    }

    /// User-facing sync: every active account the user owns.
    pub async fn sync_user(&self, user_id: &str) -> Result<SyncReport> {
        let accounts = self.db.list_accounts_for_user(user_id).await?;
        let mut report = SyncReport::default();
        for account in &accounts {
            match self.sync_account(account).await {
                Ok(r) => {
                    report.discovered += r.discovered;
                    report.synced += r.synced;
                    report.failures.extend(r.failures);
                }
                Err(e) => report
                    .failures
                    .push(format!("{}: {}", account.account_name, e)),
            }
        }
        Ok(report)
    }

    /// Cron-wide sync across every active account of every user.
    pub async fn sync_all(&self) -> Result<CronSyncReport> {
        let accounts = self.db.list_active_accounts().await?;
        let mut report = CronSyncReport {
            accounts: accounts.len(),
            ..Default::default()
        };

        for account in &accounts {
            match self.sync_account(account).await {
                Ok(r) => {
                    report.discovered += r.discovered;
                    report.synced += r.synced;
                    report.failures.extend(r.failures);
                }
                Err(e) => report
                    .failures
                    .push(format!("{}: {}", account.account_name, e)),
            }
        }

        tracing::info!(
            accounts = report.accounts,
            synced = report.synced,
            discovered = report.discovered,
            failures = report.failures.len(),
            "metrics sync finished"
        );
        Ok(report)
    }
}
