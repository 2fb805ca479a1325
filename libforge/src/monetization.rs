//! Monetization growth projector
//!
//! Pure functions over an account's current counters, its platform targets,
//! and the rolling snapshot window. No I/O here; the metrics engine feeds it
//! and persists whatever status falls out.

use chrono::NaiveDate;

use crate::types::{AccountSnapshot, MonetizationStatus, MonetizationTargets, MonetizationTrack,
    PlatformKind};

#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneProgress {
    pub name: &'static str,
    pub current: i64,
    pub target: i64,
    /// Capped at 100. Milestones the platform does not require report 100 so
    /// they never depress the aggregate.
    pub progress_percent: f64,
    /// `None` when the target is already met or growth is stalled/negative.
    pub estimated_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MonetizationProjection {
    pub status: MonetizationStatus,
    pub overall_percent: f64,
    pub milestones: Vec<MilestoneProgress>,
    /// Calendar day (`YYYY-MM-DD`) the slowest milestone is projected to
    /// land, when every unmet milestone has positive growth.
    pub estimated_eligible_date: Option<String>,
}

fn parse_day(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Daily growth rate over the snapshot window: `(latest - earliest) / days`.
/// Zero when fewer than two snapshots exist or elapsed time is non-positive.
pub fn daily_growth_rate(snapshots: &[AccountSnapshot], value: impl Fn(&AccountSnapshot) -> i64)
    -> f64
{
    let mut dated: Vec<(NaiveDate, i64)> = snapshots
        .iter()
        .filter_map(|s| parse_day(&s.date).map(|d| (d, value(s))))
        .collect();
    if dated.len() < 2 {
        return 0.0;
    }
    dated.sort_by_key(|(d, _)| *d);

    let (first_day, first) = dated[0];
    let (last_day, last) = dated[dated.len() - 1];
    let elapsed = (last_day - first_day).num_days();
    if elapsed <= 0 {
        return 0.0;
    }
    (last - first) as f64 / elapsed as f64
}

/// Days until `current` reaches `target` at `rate` per day. `Some(0)` when
/// already met; `None` when growth is stalled or negative.
pub fn estimated_days_to_target(current: i64, target: i64, rate: f64) -> Option<i64> {
    if current >= target {
        return Some(0);
    }
    if rate <= 0.0 {
        return None;
    }
    Some(((target - current) as f64 / rate).ceil() as i64)
}

fn progress_percent(current: i64, target: i64) -> f64 {
    if target <= 0 {
        return 100.0;
    }
    (current as f64 / target as f64 * 100.0).min(100.0)
}

fn milestone(
    name: &'static str,
    current: i64,
    target: i64,
    snapshots: &[AccountSnapshot],
    value: impl Fn(&AccountSnapshot) -> i64,
) -> MilestoneProgress {
    if target <= 0 {
        // Not required on this platform.
        return MilestoneProgress {
            name,
            current,
            target,
            progress_percent: 100.0,
            estimated_days: Some(0),
        };
    }
    let rate = daily_growth_rate(snapshots, value);
    MilestoneProgress {
        name,
        current,
        target,
        progress_percent: progress_percent(current, target),
        estimated_days: estimated_days_to_target(current, target, rate),
    }
}

/// Consecutive days (ending at the newest snapshot) the follower floor held.
fn consecutive_days_at_floor(snapshots: &[AccountSnapshot], floor: i64) -> i64 {
    let mut dated: Vec<(NaiveDate, i64)> = snapshots
        .iter()
        .filter_map(|s| parse_day(&s.date).map(|d| (d, s.followers)))
        .collect();
    dated.sort_by_key(|(d, _)| std::cmp::Reverse(*d));

    let mut streak = 0;
    let mut expected: Option<NaiveDate> = None;
    for (day, followers) in dated {
        if followers < floor {
            break;
        }
        if let Some(e) = expected {
            if day != e {
                break;
            }
        }
        streak += 1;
        expected = day.pred_opt();
    }
    streak
}

/// Project eligibility for one account. `today` anchors the estimated date so
/// callers (and tests) control the clock.
pub fn project(
    platform: PlatformKind,
    track: &MonetizationTrack,
    snapshots: &[AccountSnapshot],
    today: NaiveDate,
) -> MonetizationProjection {
    let targets = MonetizationTargets::for_platform(platform);

    let mut milestones = vec![
        milestone(
            "followers",
            track.current_followers,
            targets.followers,
            snapshots,
            |s| s.followers,
        ),
        milestone(
            "views_30d",
            track.current_views_30d,
            targets.views_30d,
            snapshots,
            |s| s.views,
        ),
        milestone(
            "watch_minutes_60d",
            track.current_watch_minutes_60d,
            targets.watch_minutes_60d,
            snapshots,
            |s| s.watch_minutes,
        ),
    ];

    if targets.consecutive_days > 0 {
        let streak = consecutive_days_at_floor(snapshots, targets.followers);
        milestones.push(MilestoneProgress {
            name: "consecutive_days",
            current: streak,
            target: targets.consecutive_days,
            progress_percent: progress_percent(streak, targets.consecutive_days),
            estimated_days: if streak >= targets.consecutive_days {
                Some(0)
            } else {
                // The streak grows one day per day while the floor holds.
                Some(targets.consecutive_days - streak)
            },
        });
    }

    let overall_percent =
        milestones.iter().map(|m| m.progress_percent).sum::<f64>() / milestones.len() as f64;

    let all_met = milestones.iter().all(|m| m.progress_percent >= 100.0);
    let status = if track.status == MonetizationStatus::Active {
        MonetizationStatus::Active
    } else if all_met {
        MonetizationStatus::Eligible
    } else if milestones.iter().any(|m| m.progress_percent > 0.0 && m.target > 0) {
        MonetizationStatus::InProgress
    } else {
        MonetizationStatus::NotEligible
    };

    let estimated_eligible_date = if all_met {
        None
    } else {
        let mut worst: Option<i64> = Some(0);
        for m in &milestones {
            if m.progress_percent >= 100.0 {
                continue;
            }
            match (worst, m.estimated_days) {
                (Some(w), Some(d)) => worst = Some(w.max(d)),
                _ => {
                    worst = None;
                    break;
                }
            }
        }
        worst.and_then(|days| today.checked_add_days(chrono::Days::new(days as u64)))
            .map(|d| d.format("%Y-%m-%d").to_string())
    };

    MonetizationProjection {
        status,
        overall_percent,
        milestones,
        estimated_eligible_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(date: &str, followers: i64) -> AccountSnapshot {
        AccountSnapshot {
            date: date.to_string(),
            followers,
            views: 0,
            watch_minutes: 0,
            engagement_rate: 0.0,
        }
    }

    fn track(platform: PlatformKind, followers: i64, views: i64) -> MonetizationTrack {
        MonetizationTrack {
            current_followers: followers,
            current_views_30d: views,
            ..MonetizationTrack::for_platform(platform)
        }
    }

    #[test]
    fn test_growth_rate_over_window() {
        let snapshots = vec![snap("2026-08-11", 450), snap("2026-08-01", 400)];
        let rate = daily_growth_rate(&snapshots, |s| s.followers);
        assert!((rate - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_growth_rate_degenerate_windows() {
        assert_eq!(daily_growth_rate(&[], |s| s.followers), 0.0);
        assert_eq!(
            daily_growth_rate(&[snap("2026-08-01", 400)], |s| s.followers),
            0.0
        );
        // Same day twice: non-positive elapsed time.
        assert_eq!(
            daily_growth_rate(
                &[snap("2026-08-01", 400), snap("2026-08-01", 450)],
                |s| s.followers
            ),
            0.0
        );
    }

    #[test]
    fn test_estimated_days_from_growth() {
        // 400 now, gaining 5/day, target 500.
        assert_eq!(estimated_days_to_target(400, 500, 5.0), Some(20));
    }

    #[test]
    fn test_already_met_is_zero_days_regardless_of_rate() {
        assert_eq!(estimated_days_to_target(600, 500, -3.0), Some(0));
        assert_eq!(estimated_days_to_target(500, 500, 0.0), Some(0));
    }

    #[test]
    fn test_stalled_growth_has_no_estimate() {
        assert_eq!(estimated_days_to_target(400, 500, 0.0), None);
        assert_eq!(estimated_days_to_target(400, 500, -2.0), None);
    }

    #[test]
    fn test_progress_capped_at_100() {
        let t = track(PlatformKind::TikTok, 25_000, 0);
        let projection = project(
            PlatformKind::TikTok,
            &t,
            &[],
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
        );
        let followers = &projection.milestones[0];
        assert_eq!(followers.progress_percent, 100.0);
        assert_eq!(followers.estimated_days, Some(0));
    }

    #[test]
    fn test_instagram_unrequired_metrics_report_full_progress() {
        let t = track(PlatformKind::Instagram, 0, 0);
        let projection = project(
            PlatformKind::Instagram,
            &t,
            &[],
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
        );
        for m in &projection.milestones {
            assert_eq!(m.progress_percent, 100.0, "milestone {}", m.name);
        }
        assert_eq!(projection.status, MonetizationStatus::Eligible);
    }

    #[test]
    fn test_facebook_consecutive_days_streak() {
        // Floor held the last three days, broken before that.
        let snapshots = vec![
            snap("2026-08-24", 520),
            snap("2026-08-23", 510),
            snap("2026-08-22", 505),
            snap("2026-08-21", 480),
            snap("2026-08-20", 530),
        ];
        assert_eq!(consecutive_days_at_floor(&snapshots, 500), 3);

        let t = track(PlatformKind::Facebook, 520, 0);
        let projection = project(
            PlatformKind::Facebook,
            &t,
            &snapshots,
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
        );
        let streak = projection
            .milestones
            .iter()
            .find(|m| m.name == "consecutive_days")
            .unwrap();
        assert_eq!(streak.current, 3);
        assert_eq!(streak.estimated_days, Some(27));
        assert_eq!(projection.status, MonetizationStatus::InProgress);
    }

    #[test]
    fn test_streak_requires_contiguous_days() {
        // Gap between the two qualifying snapshots.
        let snapshots = vec![snap("2026-08-24", 520), snap("2026-08-20", 530)];
        assert_eq!(consecutive_days_at_floor(&snapshots, 500), 1);
    }

    #[test]
    fn test_eligible_when_every_milestone_met() {
        let mut snapshots = Vec::new();
        for day in 1..=30 {
            snapshots.push(snap(&format!("2026-08-{:02}", day), 12_000));
        }
        let mut t = track(PlatformKind::TikTok, 12_000, 150_000);
        t.current_watch_minutes_60d = 0;
        let projection = project(
            PlatformKind::TikTok,
            &t,
            &snapshots,
            NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
        );
        assert_eq!(projection.status, MonetizationStatus::Eligible);
        assert_eq!(projection.overall_percent, 100.0);
        assert_eq!(projection.estimated_eligible_date, None);
    }

    #[test]
    fn test_estimated_date_tracks_slowest_milestone() {
        let snapshots = vec![snap("2026-08-21", 450), snap("2026-08-11", 400)];
        let t = track(PlatformKind::TikTok, 450, 100_000);
        let projection = project(
            PlatformKind::TikTok,
            &t,
            &snapshots,
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
        );
        // Followers need ceil((10000-450)/5) = 1910 days; views already met.
        assert_eq!(
            projection.estimated_eligible_date.as_deref(),
            Some("2031-11-16")
        );
    }

    #[test]
    fn test_active_status_is_sticky() {
        let mut t = track(PlatformKind::TikTok, 100, 0);
        t.status = MonetizationStatus::Active;
        let projection = project(
            PlatformKind::TikTok,
            &t,
            &[],
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
        );
        assert_eq!(projection.status, MonetizationStatus::Active);
    }
}
