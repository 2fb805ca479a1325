//! Core domain types for SocialForge

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Closed enums
// ============================================================================

/// The fixed set of supported social networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Facebook,
    TikTok,
    Instagram,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 3] = [
        PlatformKind::Facebook,
        PlatformKind::TikTok,
        PlatformKind::Instagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Facebook => "facebook",
            PlatformKind::TikTok => "tiktok",
            PlatformKind::Instagram => "instagram",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "facebook" => Some(PlatformKind::Facebook),
            "tiktok" => Some(PlatformKind::TikTok),
            "instagram" => Some(PlatformKind::Instagram),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Page,
    Profile,
    Business,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Page => "page",
            AccountKind::Profile => "profile",
            AccountKind::Business => "business",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "page" => AccountKind::Page,
            "business" => AccountKind::Business,
            _ => AccountKind::Profile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Reel,
    Video,
    Image,
    Carousel,
    Story,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Reel => "reel",
            ContentType::Video => "video",
            ContentType::Image => "image",
            ContentType::Carousel => "carousel",
            ContentType::Story => "story",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reel" => Some(ContentType::Reel),
            "video" => Some(ContentType::Video),
            "image" => Some(ContentType::Image),
            "carousel" => Some(ContentType::Carousel),
            "story" => Some(ContentType::Story),
            _ => None,
        }
    }

    /// Script-driven content types get a reel script; the rest get a caption.
    pub fn is_scripted(&self) -> bool {
        matches!(self, ContentType::Reel | ContentType::Video | ContentType::Story)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Educational,
    Entertainment,
    Inspirational,
    Controversial,
    Storytelling,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Educational => "educational",
            Tone::Entertainment => "entertainment",
            Tone::Inspirational => "inspirational",
            Tone::Controversial => "controversial",
            Tone::Storytelling => "storytelling",
        }
    }
}

/// Lifecycle of a Content Artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Generating,
    Draft,
    Ready,
    Scheduled,
    Published,
    Failed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Generating => "generating",
            ContentStatus::Draft => "draft",
            ContentStatus::Ready => "ready",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Published => "published",
            ContentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "generating" => ContentStatus::Generating,
            "draft" => ContentStatus::Draft,
            "scheduled" => ContentStatus::Scheduled,
            "published" => ContentStatus::Published,
            "failed" => ContentStatus::Failed,
            _ => ContentStatus::Ready,
        }
    }
}

/// Lifecycle of a Publication. `Queued` is the transient initial state of an
/// immediate publish; `Scheduled` waits for the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Queued,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Queued => "queued",
            PublicationStatus::Scheduled => "scheduled",
            PublicationStatus::Publishing => "publishing",
            PublicationStatus::Published => "published",
            PublicationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => PublicationStatus::Scheduled,
            "publishing" => PublicationStatus::Publishing,
            "published" => PublicationStatus::Published,
            "failed" => PublicationStatus::Failed,
            _ => PublicationStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonetizationStatus {
    NotEligible,
    InProgress,
    Eligible,
    Active,
}

impl MonetizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonetizationStatus::NotEligible => "not_eligible",
            MonetizationStatus::InProgress => "in_progress",
            MonetizationStatus::Eligible => "eligible",
            MonetizationStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => MonetizationStatus::InProgress,
            "eligible" => MonetizationStatus::Eligible,
            "active" => MonetizationStatus::Active,
            _ => MonetizationStatus::NotEligible,
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// A linked social-network identity. Soft-deleted on disconnect (`is_active`
/// cleared) because historical Publications keep referencing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub platform: PlatformKind,
    pub platform_account_id: String,
    pub account_name: String,
    pub account_type: AccountKind,
    pub avatar_url: Option<String>,
    /// Base64 of the encrypted access token. Decrypted only on demand.
    pub access_token: String,
    /// Base64 of the encrypted refresh token, when the platform issues one.
    pub refresh_token: Option<String>,
    pub token_expires_at: i64,
    pub scopes: Vec<String>,
    pub monetization: MonetizationTrack,
    pub is_active: bool,
    pub connected_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonetizationTrack {
    pub status: MonetizationStatus,
    pub current_followers: i64,
    pub current_views_30d: i64,
    pub current_watch_minutes_60d: i64,
    pub target_followers: i64,
    pub target_views: i64,
    pub target_watch_minutes: i64,
    pub last_sync_at: Option<i64>,
}

impl MonetizationTrack {
    pub fn for_platform(platform: PlatformKind) -> Self {
        let targets = MonetizationTargets::for_platform(platform);
        Self {
            status: MonetizationStatus::NotEligible,
            current_followers: 0,
            current_views_30d: 0,
            current_watch_minutes_60d: 0,
            target_followers: targets.followers,
            target_views: targets.views_30d,
            target_watch_minutes: targets.watch_minutes_60d,
            last_sync_at: None,
        }
    }
}

/// Platform-defined payout eligibility thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonetizationTargets {
    pub followers: i64,
    pub views_30d: i64,
    pub watch_minutes_60d: i64,
    /// Facebook Stars requires the follower floor to hold for this many
    /// consecutive days; zero for other platforms.
    pub consecutive_days: i64,
}

impl MonetizationTargets {
    pub fn for_platform(platform: PlatformKind) -> Self {
        match platform {
            // Stars program: follower gate only, no volume requirement.
            PlatformKind::Facebook => Self {
                followers: 500,
                views_30d: 0,
                watch_minutes_60d: 0,
                consecutive_days: 30,
            },
            PlatformKind::TikTok => Self {
                followers: 10_000,
                views_30d: 100_000,
                watch_minutes_60d: 0,
                consecutive_days: 0,
            },
            // Invitation-style program; no numeric gate to track.
            PlatformKind::Instagram => Self {
                followers: 0,
                views_30d: 0,
                watch_minutes_60d: 0,
                consecutive_days: 0,
            },
        }
    }
}

/// One entry of the bounded rolling window kept per account (≤30, newest
/// first) that feeds the growth projector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSnapshot {
    /// Calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub followers: i64,
    pub views: i64,
    pub watch_minutes: i64,
    pub engagement_rate: f64,
}

// ============================================================================
// Content artifacts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voiceover {
    pub url: String,
    pub voice_id: String,
    pub duration_seconds: f64,
}

/// Per-platform adaptation of the primary caption/hashtags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformVariant {
    pub platform: PlatformKind,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub provider: String,
    pub model: String,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: i64,
    pub hook_strength: i64,
    pub caption_quality: i64,
    pub hashtag_relevance: i64,
    pub estimated_reach: String,
    pub suggestions: Vec<String>,
}

/// The output of a generation run. Immutable once `ready` except for the
/// targeted updates (regenerate image/voice, manual upload) and the status
/// transitions driven by the Publication lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub id: String,
    pub user_id: String,
    pub content_type: ContentType,
    pub status: ContentStatus,
    pub script: Option<String>,
    pub hook: String,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub call_to_action: String,
    pub media: Vec<MediaRef>,
    pub voiceover: Option<Voiceover>,
    pub subtitles: Option<String>,
    pub variants: Vec<PlatformVariant>,
    pub generation: GenerationInfo,
    pub quality: Option<QualityScore>,
    pub created_at: i64,
}

impl ContentArtifact {
    /// Variant for a platform, or `None` when the primary caption applies.
    pub fn variant_for(&self, platform: PlatformKind) -> Option<&PlatformVariant> {
        self.variants.iter().find(|v| v.platform == platform)
    }
}

// ============================================================================
// Publications
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicationMetrics {
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub saves: i64,
    pub watch_time_seconds: i64,
    pub avg_watch_percent: f64,
    pub reach_unique: i64,
    pub impressions: i64,
    pub engagement_rate: f64,
    pub last_sync_at: Option<i64>,
}

/// One intended or completed post of one Content Artifact to one Account.
/// `platform` is denormalized from the account at creation and the two must
/// always agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub user_id: String,
    /// Absent for posts found by discovery that were never generated here.
    pub content_id: Option<String>,
    pub account_id: String,
    pub platform: PlatformKind,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub status: PublicationStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub metrics: PublicationMetrics,
    pub created_at: i64,
}

impl Publication {
    pub fn new(
        user_id: String,
        content_id: Option<String>,
        account_id: String,
        platform: PlatformKind,
        status: PublicationStatus,
        scheduled_at: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content_id,
            account_id,
            platform,
            scheduled_at,
            published_at: None,
            platform_post_id: None,
            platform_post_url: None,
            status,
            error_message: None,
            retry_count: 0,
            metrics: PublicationMetrics::default(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

// ============================================================================
// Daily metrics snapshots
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTypeBreakdown {
    pub reels: CategoryMetrics,
    pub videos: CategoryMetrics,
    pub images: CategoryMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub views: i64,
    pub engagement: f64,
}

/// One row per account per calendar day, upserted idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub account_id: String,
    /// Calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub followers: i64,
    pub followers_growth: i64,
    pub total_views: i64,
    pub total_watch_minutes: i64,
    pub avg_engagement_rate: f64,
    pub posts_published: i64,
    pub by_content_type: ContentTypeBreakdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_kind_roundtrip() {
        for kind in PlatformKind::ALL {
            assert_eq!(PlatformKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PlatformKind::parse("myspace"), None);
    }

    #[test]
    fn test_platform_kind_serde_lowercase() {
        let json = serde_json::to_string(&PlatformKind::TikTok).unwrap();
        assert_eq!(json, r#""tiktok""#);
        let parsed: PlatformKind = serde_json::from_str(r#""facebook""#).unwrap();
        assert_eq!(parsed, PlatformKind::Facebook);
    }

    #[test]
    fn test_publication_new_defaults() {
        let publication = Publication::new(
            "user-1".to_string(),
            Some("content-1".to_string()),
            "acct-1".to_string(),
            PlatformKind::Facebook,
            PublicationStatus::Queued,
            None,
        );
        assert!(Uuid::parse_str(&publication.id).is_ok());
        assert_eq!(publication.status, PublicationStatus::Queued);
        assert_eq!(publication.retry_count, 0);
        assert!(publication.platform_post_id.is_none());
        assert_eq!(publication.metrics.views, 0);
    }

    #[test]
    fn test_monetization_targets_per_platform() {
        let fb = MonetizationTargets::for_platform(PlatformKind::Facebook);
        assert_eq!(fb.followers, 500);
        assert_eq!(fb.views_30d, 0);
        assert_eq!(fb.consecutive_days, 30);

        let tt = MonetizationTargets::for_platform(PlatformKind::TikTok);
        assert_eq!(tt.followers, 10_000);
        assert_eq!(tt.views_30d, 100_000);

        let ig = MonetizationTargets::for_platform(PlatformKind::Instagram);
        assert_eq!(ig.followers, 0);
    }

    #[test]
    fn test_variant_lookup_falls_back_to_none() {
        let artifact = ContentArtifact {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            content_type: ContentType::Image,
            status: ContentStatus::Ready,
            script: None,
            hook: "Hook".to_string(),
            caption: "Primary caption".to_string(),
            hashtags: vec!["#a".to_string()],
            call_to_action: "CTA".to_string(),
            media: vec![],
            voiceover: None,
            subtitles: None,
            variants: vec![PlatformVariant {
                platform: PlatformKind::TikTok,
                caption: "TikTok caption".to_string(),
                hashtags: vec!["#tt".to_string()],
                aspect_ratio: "9:16".to_string(),
            }],
            generation: GenerationInfo {
                provider: "groq".to_string(),
                model: "llama".to_string(),
                tokens_used: 10,
            },
            quality: None,
            created_at: 0,
        };

        assert!(artifact.variant_for(PlatformKind::Facebook).is_none());
        assert_eq!(
            artifact.variant_for(PlatformKind::TikTok).unwrap().caption,
            "TikTok caption"
        );
    }

    #[test]
    fn test_status_parse_defaults() {
        assert_eq!(PublicationStatus::parse("published"), PublicationStatus::Published);
        assert_eq!(PublicationStatus::parse("bogus"), PublicationStatus::Queued);
        assert_eq!(ContentStatus::parse("bogus"), ContentStatus::Ready);
    }
}
