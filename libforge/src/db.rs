//! Database operations for SocialForge
//!
//! Raw SQL over a SQLite pool. Queried fields live in scalar columns so the
//! aggregation queries can use SUM/AVG; nested artifact lists (media refs,
//! variants, voiceover, quality) are JSON columns. The lifecycle guards are
//! conditional UPDATE/DELETE statements whose affected-row count tells the
//! caller whether it won the transition.

use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    Account, AccountKind, AccountSnapshot, CategoryMetrics, ContentArtifact, ContentStatus,
    ContentType, ContentTypeBreakdown, DailySnapshot, MonetizationStatus, MonetizationTrack,
    PlatformKind, Publication, PublicationMetrics, PublicationStatus,
};

/// How many rolling snapshots each account keeps.
pub const SNAPSHOT_WINDOW: i64 = 30;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work for SQLite URLs on every platform; mode=rwc
        // creates the file on first run.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Insert or update an account keyed by (platform, external account id).
    /// Reconnecting refreshes tokens, name, and scopes and reactivates the
    /// row; monetization counters survive the reconnect. Returns the id of
    /// the surviving row, which on a reconnect is the existing one, not the
    /// id carried by `account`.
    pub async fn upsert_account(&self, account: &Account) -> Result<String> {
        use sqlx::Row;
        let scopes = serde_json::to_string(&account.scopes).unwrap_or_else(|_| "[]".to_string());

        let row = sqlx::query(
            r#"
            INSERT INTO accounts (
                id, user_id, platform, platform_account_id, account_name,
                account_type, avatar_url, access_token, refresh_token,
                token_expires_at, scopes, monetization_status,
                current_followers, current_views_30d, current_watch_minutes_60d,
                target_followers, target_views, target_watch_minutes,
                metrics_last_sync_at, is_active, connected_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (platform, platform_account_id) DO UPDATE SET
                user_id = excluded.user_id,
                account_name = excluded.account_name,
                account_type = excluded.account_type,
                avatar_url = excluded.avatar_url,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                scopes = excluded.scopes,
                is_active = 1,
                connected_at = excluded.connected_at
            RETURNING id
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.platform_account_id)
        .bind(&account.account_name)
        .bind(account.account_type.as_str())
        .bind(&account.avatar_url)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.token_expires_at)
        .bind(scopes)
        .bind(account.monetization.status.as_str())
        .bind(account.monetization.current_followers)
        .bind(account.monetization.current_views_30d)
        .bind(account.monetization.current_watch_minutes_60d)
        .bind(account.monetization.target_followers)
        .bind(account.monetization.target_views)
        .bind(account.monetization.target_watch_minutes)
        .bind(account.monetization.last_sync_at)
        .bind(if account.is_active { 1i64 } else { 0i64 })
        .bind(account.connected_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("id"))
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_account(&r)))
    }

    /// Fetch an account only when it belongs to `user_id`. An ownership
    /// mismatch looks identical to a missing row.
    pub async fn get_account_owned(
        &self,
        account_id: &str,
        user_id: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ? AND user_id = ?")
            .bind(account_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_account(&r)))
    }

    pub async fn list_accounts_for_user(&self, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT * FROM accounts WHERE user_id = ? AND is_active = 1 ORDER BY connected_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Every active account across all users, for the cron-wide sync.
    pub async fn list_active_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Soft-delete: historical publications keep referencing the row.
    /// Returns false when the account is missing or owned by someone else.
    pub async fn deactivate_account(&self, account_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET is_active = 0 WHERE id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(account_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard delete for the data-deletion webhook. Returns how many accounts
    /// were removed for this external platform user.
    pub async fn delete_accounts_by_platform_user(
        &self,
        platform: PlatformKind,
        platform_account_id: &str,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM accounts WHERE platform = ? AND platform_account_id = ?")
                .bind(platform.as_str())
                .bind(platform_account_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn update_account_monetization(
        &self,
        account_id: &str,
        track: &MonetizationTrack,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                monetization_status = ?,
                current_followers = ?,
                current_views_30d = ?,
                current_watch_minutes_60d = ?,
                metrics_last_sync_at = ?
            WHERE id = ?
            "#,
        )
        .bind(track.status.as_str())
        .bind(track.current_followers)
        .bind(track.current_views_30d)
        .bind(track.current_watch_minutes_60d)
        .bind(track.last_sync_at)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record today's snapshot for the account and trim the rolling window
    /// to the newest [`SNAPSHOT_WINDOW`] entries. Re-running on the same day
    /// replaces that day's entry.
    pub async fn push_account_snapshot(
        &self,
        account_id: &str,
        snapshot: &AccountSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshots
                (account_id, date, followers, views, watch_minutes, engagement_rate)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id, date) DO UPDATE SET
                followers = excluded.followers,
                views = excluded.views,
                watch_minutes = excluded.watch_minutes,
                engagement_rate = excluded.engagement_rate
            "#,
        )
        .bind(account_id)
        .bind(&snapshot.date)
        .bind(snapshot.followers)
        .bind(snapshot.views)
        .bind(snapshot.watch_minutes)
        .bind(snapshot.engagement_rate)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            DELETE FROM account_snapshots
            WHERE account_id = ?
              AND id NOT IN (
                  SELECT id FROM account_snapshots
                  WHERE account_id = ?
                  ORDER BY date DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(account_id)
        .bind(account_id)
        .bind(SNAPSHOT_WINDOW)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Rolling snapshots, newest first.
    pub async fn get_account_snapshots(&self, account_id: &str) -> Result<Vec<AccountSnapshot>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT date, followers, views, watch_minutes, engagement_rate
            FROM account_snapshots
            WHERE account_id = ?
            ORDER BY date DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(SNAPSHOT_WINDOW)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| AccountSnapshot {
                date: r.get("date"),
                followers: r.get("followers"),
                views: r.get("views"),
                watch_minutes: r.get("watch_minutes"),
                engagement_rate: r.get("engagement_rate"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Contents
    // ------------------------------------------------------------------

    pub async fn create_content(&self, content: &ContentArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contents (
                id, user_id, content_type, status, script, hook, caption,
                hashtags, call_to_action, media, voiceover, subtitles,
                variants, generation, quality, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.user_id)
        .bind(content.content_type.as_str())
        .bind(content.status.as_str())
        .bind(&content.script)
        .bind(&content.hook)
        .bind(&content.caption)
        .bind(to_json(&content.hashtags))
        .bind(&content.call_to_action)
        .bind(to_json(&content.media))
        .bind(content.voiceover.as_ref().map(to_json))
        .bind(&content.subtitles)
        .bind(to_json(&content.variants))
        .bind(to_json(&content.generation))
        .bind(content.quality.as_ref().map(to_json))
        .bind(content.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_content(
        &self,
        content_id: &str,
        user_id: &str,
    ) -> Result<Option<ContentArtifact>> {
        let row = sqlx::query("SELECT * FROM contents WHERE id = ? AND user_id = ?")
            .bind(content_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_content(&r)))
    }

    pub async fn update_content_status(
        &self,
        content_id: &str,
        status: ContentStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE contents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Replace the media list (regenerated image, synthesized video).
    pub async fn update_content_media(
        &self,
        content_id: &str,
        media: &[crate::types::MediaRef],
    ) -> Result<()> {
        sqlx::query("UPDATE contents SET media = ? WHERE id = ?")
            .bind(to_json(&media))
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    pub async fn create_publication(&self, publication: &Publication) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publications (
                id, user_id, content_id, account_id, platform, scheduled_at,
                published_at, platform_post_id, platform_post_url, status,
                error_message, retry_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&publication.id)
        .bind(&publication.user_id)
        .bind(&publication.content_id)
        .bind(&publication.account_id)
        .bind(publication.platform.as_str())
        .bind(publication.scheduled_at)
        .bind(publication.published_at)
        .bind(&publication.platform_post_id)
        .bind(&publication.platform_post_url)
        .bind(publication.status.as_str())
        .bind(&publication.error_message)
        .bind(publication.retry_count)
        .bind(publication.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_publication(
        &self,
        publication_id: &str,
        user_id: &str,
    ) -> Result<Option<Publication>> {
        let row = sqlx::query("SELECT * FROM publications WHERE id = ? AND user_id = ?")
            .bind(publication_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_publication(&r)))
    }

    /// Fetch without an ownership filter, for internal dispatch paths that
    /// already hold a publication id.
    pub async fn get_publication_any(&self, publication_id: &str) -> Result<Option<Publication>> {
        let row = sqlx::query("SELECT * FROM publications WHERE id = ?")
            .bind(publication_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_publication(&r)))
    }

    pub async fn list_publications_for_user(&self, user_id: &str) -> Result<Vec<Publication>> {
        let rows =
            sqlx::query("SELECT * FROM publications WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_publication).collect())
    }

    /// Scheduled publications whose time has come, oldest first, bounded.
    pub async fn list_due_publications(&self, now: i64, limit: i64) -> Result<Vec<Publication>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publications
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_publication).collect())
    }

    /// Compare-and-set transition into `publishing`. Only one caller wins;
    /// a sweep that lost the race gets `false` and must skip the row.
    pub async fn cas_mark_publishing(&self, publication_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publications SET status = 'publishing'
            WHERE id = ? AND status IN ('scheduled', 'queued')
            "#,
        )
        .bind(publication_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_published(
        &self,
        publication_id: &str,
        platform_post_id: &str,
        platform_post_url: Option<&str>,
        published_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications SET
                status = 'published',
                platform_post_id = ?,
                platform_post_url = ?,
                published_at = ?,
                error_message = NULL
            WHERE id = ?
            "#,
        )
        .bind(platform_post_id)
        .bind(platform_post_url)
        .bind(published_at)
        .bind(publication_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Terminal failure: record the message and bump `retry_count` in SQL so
    /// the increment is atomic and never resets.
    pub async fn mark_failed(&self, publication_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications SET
                status = 'failed',
                error_message = ?,
                retry_count = retry_count + 1
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(publication_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Re-arm a failed publication for an explicit user retry.
    pub async fn cas_requeue_failed(&self, publication_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publications SET status = 'queued', error_message = NULL
            WHERE id = ? AND user_id = ? AND status = 'failed'
            "#,
        )
        .bind(publication_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancellation is legal only while still `scheduled`; the conditional
    /// DELETE makes an in-flight or finished publication uncancelable.
    pub async fn cas_cancel_scheduled(&self, publication_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM publications WHERE id = ? AND user_id = ? AND status = 'scheduled'",
        )
        .bind(publication_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Does any publication (any status) already reference this platform
    /// post? Discovery uses this for idempotency.
    /// How many `scheduled` publications still reference this content. Drives
    /// the content status revert after a cancel.
    pub async fn count_scheduled_for_content(&self, content_id: &str) -> Result<i64> {
        use sqlx::Row;

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM publications WHERE content_id = ? AND status = 'scheduled'",
        )
        .bind(content_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get::<i64, _>("n"))
    }

    pub async fn publication_exists_for_platform_post(
        &self,
        account_id: &str,
        platform_post_id: &str,
    ) -> Result<bool> {
        use sqlx::Row;

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM publications WHERE account_id = ? AND platform_post_id = ?",
        )
        .bind(account_id)
        .bind(platform_post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get::<i64, _>("n") > 0)
    }

    /// Published rows for an account inside the look-back window.
    pub async fn list_published_since(
        &self,
        account_id: &str,
        since: i64,
    ) -> Result<Vec<Publication>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publications
            WHERE account_id = ? AND status = 'published' AND published_at >= ?
            ORDER BY published_at DESC
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_publication).collect())
    }

    /// Overwrite the metrics sub-record from a fresh platform fetch.
    pub async fn update_publication_metrics(
        &self,
        publication_id: &str,
        metrics: &PublicationMetrics,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications SET
                metrics_views = ?,
                metrics_likes = ?,
                metrics_comments = ?,
                metrics_shares = ?,
                metrics_saves = ?,
                metrics_watch_time_seconds = ?,
                metrics_avg_watch_percent = ?,
                metrics_reach_unique = ?,
                metrics_impressions = ?,
                metrics_engagement_rate = ?,
                metrics_last_sync_at = ?
            WHERE id = ?
            "#,
        )
        .bind(metrics.views)
        .bind(metrics.likes)
        .bind(metrics.comments)
        .bind(metrics.shares)
        .bind(metrics.saves)
        .bind(metrics.watch_time_seconds)
        .bind(metrics.avg_watch_percent)
        .bind(metrics.reach_unique)
        .bind(metrics.impressions)
        .bind(metrics.engagement_rate)
        .bind(metrics.last_sync_at)
        .bind(publication_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregation and daily snapshots
    // ------------------------------------------------------------------

    /// Aggregate published-post metrics for one account: totals, averages,
    /// and a per-content-type breakdown joined through the content row.
    pub async fn aggregate_account_metrics(&self, account_id: &str) -> Result<AccountAggregates> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS posts,
                COALESCE(SUM(metrics_views), 0) AS views,
                COALESCE(SUM(metrics_likes), 0) AS likes,
                COALESCE(SUM(metrics_comments), 0) AS comments,
                COALESCE(SUM(metrics_shares), 0) AS shares,
                COALESCE(SUM(metrics_watch_time_seconds), 0) AS watch_seconds,
                COALESCE(AVG(metrics_engagement_rate), 0.0) AS engagement
            FROM publications
            WHERE account_id = ? AND status = 'published'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut aggregates = AccountAggregates {
            posts_published: row.get("posts"),
            total_views: row.get("views"),
            total_likes: row.get("likes"),
            total_comments: row.get("comments"),
            total_shares: row.get("shares"),
            total_watch_minutes: row.get::<i64, _>("watch_seconds") / 60,
            avg_engagement_rate: row.get("engagement"),
            by_content_type: ContentTypeBreakdown::default(),
        };

        let rows = sqlx::query(
            r#"
            SELECT
                c.content_type AS content_type,
                COALESCE(SUM(p.metrics_views), 0) AS views,
                COALESCE(AVG(p.metrics_engagement_rate), 0.0) AS engagement
            FROM publications p
            JOIN contents c ON c.id = p.content_id
            WHERE p.account_id = ? AND p.status = 'published'
            GROUP BY c.content_type
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        for r in &rows {
            let bucket = CategoryMetrics {
                views: r.get("views"),
                engagement: r.get("engagement"),
            };
            match r.get::<String, _>("content_type").as_str() {
                "reel" => aggregates.by_content_type.reels = bucket,
                "video" => aggregates.by_content_type.videos = bucket,
                "image" | "carousel" => aggregates.by_content_type.images = bucket,
                _ => {}
            }
        }

        Ok(aggregates)
    }

    /// Idempotent per-day snapshot: the second write for (account, date)
    /// replaces the first.
    pub async fn upsert_daily_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_snapshots (
                account_id, date, followers, followers_growth, total_views,
                total_watch_minutes, avg_engagement_rate, posts_published,
                reels_views, reels_engagement, videos_views, videos_engagement,
                images_views, images_engagement, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id, date) DO UPDATE SET
                followers = excluded.followers,
                followers_growth = excluded.followers_growth,
                total_views = excluded.total_views,
                total_watch_minutes = excluded.total_watch_minutes,
                avg_engagement_rate = excluded.avg_engagement_rate,
                posts_published = excluded.posts_published,
                reels_views = excluded.reels_views,
                reels_engagement = excluded.reels_engagement,
                videos_views = excluded.videos_views,
                videos_engagement = excluded.videos_engagement,
                images_views = excluded.images_views,
                images_engagement = excluded.images_engagement
            "#,
        )
        .bind(&snapshot.account_id)
        .bind(&snapshot.date)
        .bind(snapshot.followers)
        .bind(snapshot.followers_growth)
        .bind(snapshot.total_views)
        .bind(snapshot.total_watch_minutes)
        .bind(snapshot.avg_engagement_rate)
        .bind(snapshot.posts_published)
        .bind(snapshot.by_content_type.reels.views)
        .bind(snapshot.by_content_type.reels.engagement)
        .bind(snapshot.by_content_type.videos.views)
        .bind(snapshot.by_content_type.videos.engagement)
        .bind(snapshot.by_content_type.images.views)
        .bind(snapshot.by_content_type.images.engagement)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_daily_snapshot(
        &self,
        account_id: &str,
        date: &str,
    ) -> Result<Option<DailySnapshot>> {
        use sqlx::Row;

        let row = sqlx::query("SELECT * FROM daily_snapshots WHERE account_id = ? AND date = ?")
            .bind(account_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| DailySnapshot {
            account_id: r.get("account_id"),
            date: r.get("date"),
            followers: r.get("followers"),
            followers_growth: r.get("followers_growth"),
            total_views: r.get("total_views"),
            total_watch_minutes: r.get("total_watch_minutes"),
            avg_engagement_rate: r.get("avg_engagement_rate"),
            posts_published: r.get("posts_published"),
            by_content_type: ContentTypeBreakdown {
                reels: CategoryMetrics {
                    views: r.get("reels_views"),
                    engagement: r.get("reels_engagement"),
                },
                videos: CategoryMetrics {
                    views: r.get("videos_views"),
                    engagement: r.get("videos_engagement"),
                },
                images: CategoryMetrics {
                    views: r.get("images_views"),
                    engagement: r.get("images_engagement"),
                },
            },
        }))
    }

    /// Delete daily snapshots older than `cutoff_date` (YYYY-MM-DD).
    /// Returns the number of purged rows.
    pub async fn purge_expired_snapshots(&self, cutoff_date: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM daily_snapshots WHERE date < ?")
            .bind(cutoff_date)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountAggregates {
    pub posts_published: i64,
    pub total_views: i64,
    pub total_likes: i64,
    pub total_comments: i64,
    pub total_shares: i64,
    pub total_watch_minutes: i64,
    pub avg_engagement_rate: f64,
    pub by_content_type: ContentTypeBreakdown,
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_account(r: &sqlx::sqlite::SqliteRow) -> Account {
    use sqlx::Row;

    Account {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform: PlatformKind::parse(&r.get::<String, _>("platform"))
            .unwrap_or(PlatformKind::Facebook),
        platform_account_id: r.get("platform_account_id"),
        account_name: r.get("account_name"),
        account_type: AccountKind::parse(&r.get::<String, _>("account_type")),
        avatar_url: r.get("avatar_url"),
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        token_expires_at: r.get("token_expires_at"),
        scopes: from_json(&r.get::<String, _>("scopes")),
        monetization: MonetizationTrack {
            status: MonetizationStatus::parse(&r.get::<String, _>("monetization_status")),
            current_followers: r.get("current_followers"),
            current_views_30d: r.get("current_views_30d"),
            current_watch_minutes_60d: r.get("current_watch_minutes_60d"),
            target_followers: r.get("target_followers"),
            target_views: r.get("target_views"),
            target_watch_minutes: r.get("target_watch_minutes"),
            last_sync_at: r.get("metrics_last_sync_at"),
        },
        is_active: r.get::<i64, _>("is_active") != 0,
        connected_at: r.get("connected_at"),
    }
}

fn row_to_content(r: &sqlx::sqlite::SqliteRow) -> ContentArtifact {
    use sqlx::Row;

    ContentArtifact {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content_type: ContentType::parse(&r.get::<String, _>("content_type"))
            .unwrap_or(ContentType::Image),
        status: ContentStatus::parse(&r.get::<String, _>("status")),
        script: r.get("script"),
        hook: r.get("hook"),
        caption: r.get("caption"),
        hashtags: from_json(&r.get::<String, _>("hashtags")),
        call_to_action: r.get("call_to_action"),
        media: from_json(&r.get::<String, _>("media")),
        voiceover: r
            .get::<Option<String>, _>("voiceover")
            .and_then(|raw| serde_json::from_str(&raw).ok()),
        subtitles: r.get("subtitles"),
        variants: from_json(&r.get::<String, _>("variants")),
        generation: serde_json::from_str(&r.get::<String, _>("generation")).unwrap_or(
            crate::types::GenerationInfo {
                provider: String::new(),
                model: String::new(),
                tokens_used: 0,
            },
        ),
        quality: r
            .get::<Option<String>, _>("quality")
            .and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: r.get("created_at"),
    }
}

fn row_to_publication(r: &sqlx::sqlite::SqliteRow) -> Publication {
    use sqlx::Row;

    Publication {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content_id: r.get("content_id"),
        account_id: r.get("account_id"),
        platform: PlatformKind::parse(&r.get::<String, _>("platform"))
            .unwrap_or(PlatformKind::Facebook),
        scheduled_at: r.get("scheduled_at"),
        published_at: r.get("published_at"),
        platform_post_id: r.get("platform_post_id"),
        platform_post_url: r.get("platform_post_url"),
        status: PublicationStatus::parse(&r.get::<String, _>("status")),
        error_message: r.get("error_message"),
        retry_count: r.get("retry_count"),
        metrics: PublicationMetrics {
            views: r.get("metrics_views"),
            likes: r.get("metrics_likes"),
            comments: r.get("metrics_comments"),
            shares: r.get("metrics_shares"),
            saves: r.get("metrics_saves"),
            watch_time_seconds: r.get("metrics_watch_time_seconds"),
            avg_watch_percent: r.get("metrics_avg_watch_percent"),
            reach_unique: r.get("metrics_reach_unique"),
            impressions: r.get("metrics_impressions"),
            engagement_rate: r.get("metrics_engagement_rate"),
            last_sync_at: r.get("metrics_last_sync_at"),
        },
        created_at: r.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationInfo, MonetizationTargets};

    async fn test_db() -> Database {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .unwrap();
        Database::from_pool(pool)
    }

    fn test_account(id: &str, user_id: &str) -> Account {
        let targets = MonetizationTargets::for_platform(PlatformKind::Facebook);
        Account {
            id: id.to_string(),
            user_id: user_id.to_string(),
            platform: PlatformKind::Facebook,
            platform_account_id: format!("ext-{}", id),
            account_name: "Test Page".to_string(),
            account_type: AccountKind::Page,
            avatar_url: None,
            access_token: "ciphertext".to_string(),
            refresh_token: None,
            token_expires_at: 0,
            scopes: vec!["pages_manage_posts".to_string()],
            monetization: MonetizationTrack {
                status: MonetizationStatus::NotEligible,
                current_followers: 0,
                current_views_30d: 0,
                current_watch_minutes_60d: 0,
                target_followers: targets.followers,
                target_views: targets.views_30d,
                target_watch_minutes: targets.watch_minutes_60d,
                last_sync_at: None,
            },
            is_active: true,
            connected_at: 1_700_000_000,
        }
    }

    fn test_publication(id: &str, account_id: &str, status: PublicationStatus) -> Publication {
        let mut publication = Publication::new(
            "user-1".to_string(),
            None,
            account_id.to_string(),
            PlatformKind::Facebook,
            status,
            None,
        );
        publication.id = id.to_string();
        publication
    }

    #[tokio::test]
    async fn test_cas_mark_publishing_single_winner() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        let mut publication = test_publication("p1", "a1", PublicationStatus::Scheduled);
        publication.scheduled_at = Some(100);
        db.create_publication(&publication).await.unwrap();

        assert!(db.cas_mark_publishing("p1").await.unwrap());
        // Second sweeper loses the race.
        assert!(!db.cas_mark_publishing("p1").await.unwrap());

        let row = db.get_publication("p1", "user-1").await.unwrap().unwrap();
        assert_eq!(row.status, PublicationStatus::Publishing);
    }

    #[tokio::test]
    async fn test_retry_count_increments_and_never_resets() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();
        db.create_publication(&test_publication("p1", "a1", PublicationStatus::Queued))
            .await
            .unwrap();

        db.mark_failed("p1", "network down").await.unwrap();
        db.mark_failed("p1", "still down").await.unwrap();

        let row = db.get_publication("p1", "user-1").await.unwrap().unwrap();
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.error_message.as_deref(), Some("still down"));

        // Requeue clears the message but keeps the count.
        assert!(db.cas_requeue_failed("p1", "user-1").await.unwrap());
        let row = db.get_publication("p1", "user-1").await.unwrap().unwrap();
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.status, PublicationStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_only_while_scheduled() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        let mut scheduled = test_publication("p1", "a1", PublicationStatus::Scheduled);
        scheduled.scheduled_at = Some(100);
        db.create_publication(&scheduled).await.unwrap();
        db.create_publication(&test_publication("p2", "a1", PublicationStatus::Publishing))
            .await
            .unwrap();

        assert!(db.cas_cancel_scheduled("p1", "user-1").await.unwrap());
        assert!(!db.cas_cancel_scheduled("p2", "user-1").await.unwrap());
        // Ownership mismatch behaves like not-found.
        assert!(!db.cas_cancel_scheduled("p2", "user-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_due_publications_bounded_and_ordered() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        for i in 0..15 {
            let mut p = test_publication(&format!("p{}", i), "a1", PublicationStatus::Scheduled);
            p.scheduled_at = Some(100 - i as i64);
            db.create_publication(&p).await.unwrap();
        }
        // Not yet due.
        let mut future = test_publication("future", "a1", PublicationStatus::Scheduled);
        future.scheduled_at = Some(10_000);
        db.create_publication(&future).await.unwrap();

        let due = db.list_due_publications(200, 10).await.unwrap();
        assert_eq!(due.len(), 10);
        // Oldest first.
        assert!(due.windows(2).all(|w| w[0].scheduled_at <= w[1].scheduled_at));
        assert!(due.iter().all(|p| p.id != "future"));
    }

    #[tokio::test]
    async fn test_account_snapshot_window_trims_to_thirty() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        for day in 1..=35 {
            let snapshot = AccountSnapshot {
                date: format!("2026-07-{:02}", day.min(31)),
                followers: 100 + day,
                views: 0,
                watch_minutes: 0,
                engagement_rate: 0.0,
            };
            // Days past 31 roll into August.
            let snapshot = if day > 31 {
                AccountSnapshot {
                    date: format!("2026-08-{:02}", day - 31),
                    ..snapshot
                }
            } else {
                snapshot
            };
            db.push_account_snapshot("a1", &snapshot).await.unwrap();
        }

        let snapshots = db.get_account_snapshots("a1").await.unwrap();
        assert_eq!(snapshots.len() as i64, SNAPSHOT_WINDOW);
        // Newest first.
        assert_eq!(snapshots[0].date, "2026-08-04");
        assert!(snapshots.windows(2).all(|w| w[0].date >= w[1].date));
    }

    #[tokio::test]
    async fn test_daily_snapshot_upsert_is_idempotent() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        let mut snapshot = DailySnapshot {
            account_id: "a1".to_string(),
            date: "2026-08-24".to_string(),
            followers: 100,
            followers_growth: 5,
            total_views: 1000,
            total_watch_minutes: 50,
            avg_engagement_rate: 2.5,
            posts_published: 3,
            by_content_type: ContentTypeBreakdown::default(),
        };
        db.upsert_daily_snapshot(&snapshot).await.unwrap();

        snapshot.followers = 110;
        db.upsert_daily_snapshot(&snapshot).await.unwrap();

        let stored = db
            .get_daily_snapshot("a1", "2026-08-24")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.followers, 110);
    }

    #[tokio::test]
    async fn test_purge_expired_snapshots() {
        let db = test_db().await;
        db.upsert_account(&test_account("a1", "user-1")).await.unwrap();

        for date in ["2025-01-01", "2025-06-01", "2026-08-01"] {
            db.upsert_daily_snapshot(&DailySnapshot {
                account_id: "a1".to_string(),
                date: date.to_string(),
                followers: 1,
                followers_growth: 0,
                total_views: 0,
                total_watch_minutes: 0,
                avg_engagement_rate: 0.0,
                posts_published: 0,
                by_content_type: ContentTypeBreakdown::default(),
            })
            .await
            .unwrap();
        }

        let purged = db.purge_expired_snapshots("2025-08-24").await.unwrap();
        assert_eq!(purged, 2);
        assert!(db
            .get_daily_snapshot("a1", "2026-08-01")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_content_roundtrip_with_json_columns() {
        let db = test_db().await;

        let content = ContentArtifact {
            id: "c1".to_string(),
            user_id: "user-1".to_string(),
            content_type: ContentType::Reel,
            status: ContentStatus::Ready,
            script: Some("Scene 1".to_string()),
            hook: "Stop scrolling".to_string(),
            caption: "A caption".to_string(),
            hashtags: vec!["#one".to_string(), "#two".to_string()],
            call_to_action: "Follow".to_string(),
            media: vec![],
            voiceover: None,
            subtitles: None,
            variants: vec![],
            generation: GenerationInfo {
                provider: "groq".to_string(),
                model: "llama-3.3-70b".to_string(),
                tokens_used: 512,
            },
            quality: None,
            created_at: 1_700_000_000,
        };
        db.create_content(&content).await.unwrap();

        let stored = db.get_content("c1", "user-1").await.unwrap().unwrap();
        assert_eq!(stored.hashtags, content.hashtags);
        assert_eq!(stored.generation.provider, "groq");
        assert_eq!(stored.content_type, ContentType::Reel);

        // Ownership mismatch reads as missing.
        assert!(db.get_content("c1", "user-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_upsert_preserves_monetization_counters() {
        let db = test_db().await;

        let mut account = test_account("a1", "user-1");
        db.upsert_account(&account).await.unwrap();

        let mut track = account.monetization.clone();
        track.current_followers = 450;
        track.status = MonetizationStatus::InProgress;
        db.update_account_monetization("a1", &track).await.unwrap();

        // Reconnect with fresh tokens.
        account.access_token = "new-ciphertext".to_string();
        db.upsert_account(&account).await.unwrap();

        let stored = db.get_account("a1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new-ciphertext");
        assert_eq!(stored.monetization.current_followers, 450);
        assert_eq!(stored.monetization.status, MonetizationStatus::InProgress);
    }
}
