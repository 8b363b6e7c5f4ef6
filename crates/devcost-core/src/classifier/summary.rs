//! Per-type summaries of classified activities

use devcost_types::{Activity, ActivityType, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals for one activity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub count: usize,
    pub tokens: TokenUsage,
    /// Sum of `end - start` over activities with both timestamps
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub by_type: BTreeMap<ActivityType, TypeSummary>,
    pub total_count: usize,
    pub total_tokens: TokenUsage,
    pub total_elapsed_ms: i64,
}

/// Averages derived from an [`ActivitySummary`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyMetrics {
    pub avg_tokens: f64,
    pub avg_elapsed_ms: f64,
    /// 0.0 when no positive elapsed time was recorded
    pub tokens_per_minute: f64,
}

pub fn summarize(activities: &[Activity]) -> ActivitySummary {
    let mut summary = ActivitySummary::default();

    for activity in activities {
        let entry = summary.by_type.entry(activity.activity_type).or_default();
        entry.count += 1;
        entry.tokens += activity.tokens;
        entry.elapsed_ms += activity.elapsed_ms();

        summary.total_count += 1;
        summary.total_tokens += activity.tokens;
        summary.total_elapsed_ms += activity.elapsed_ms();
    }

    summary
}

pub fn efficiency_metrics(summary: &ActivitySummary) -> BTreeMap<ActivityType, EfficiencyMetrics> {
    summary
        .by_type
        .iter()
        .filter(|(_, s)| s.count > 0)
        .map(|(activity_type, s)| {
            let count = s.count as f64;
            let total = s.tokens.total() as f64;
            let tokens_per_minute = if s.elapsed_ms > 0 {
                total / (s.elapsed_ms as f64 / 60_000.0)
            } else {
                0.0
            };
            (
                *activity_type,
                EfficiencyMetrics {
                    avg_tokens: total / count,
                    avg_elapsed_ms: s.elapsed_ms as f64 / count,
                    tokens_per_minute,
                },
            )
        })
        .collect()
}

/// Percentage of activities per type (sums to 100; empty input → empty map)
pub fn type_distribution(activities: &[Activity]) -> BTreeMap<ActivityType, f64> {
    if activities.is_empty() {
        return BTreeMap::new();
    }

    let mut counts: BTreeMap<ActivityType, usize> = BTreeMap::new();
    for activity in activities {
        *counts.entry(activity.activity_type).or_insert(0) += 1;
    }

    let total = activities.len() as f64;
    counts
        .into_iter()
        .map(|(activity_type, count)| (activity_type, count as f64 * 100.0 / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn activity(id: &str, activity_type: ActivityType, input: u64, output: u64) -> Activity {
        Activity::new(id, activity_type, "", TokenUsage::new(input, output))
    }

    fn timed(activity: Activity, minutes: i64) -> Activity {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        activity.with_times(start, start + Duration::minutes(minutes))
    }

    #[test]
    fn test_summarize() {
        let activities = vec![
            timed(activity("a", ActivityType::Coding, 100, 50), 2),
            activity("b", ActivityType::Coding, 10, 10),
            timed(activity("c", ActivityType::Chat, 5, 5), 1),
        ];

        let summary = summarize(&activities);
        let coding = summary.by_type[&ActivityType::Coding];
        assert_eq!(coding.count, 2);
        assert_eq!(coding.tokens, TokenUsage::new(110, 60));
        assert_eq!(coding.elapsed_ms, 120_000);

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.total_tokens.total(), 180);
        assert_eq!(summary.total_elapsed_ms, 180_000);
        assert!(!summary.by_type.contains_key(&ActivityType::Debugging));
    }

    #[test]
    fn test_efficiency_metrics() {
        let activities = vec![
            timed(activity("a", ActivityType::Coding, 100, 50), 2),
            activity("b", ActivityType::Coding, 10, 10),
            activity("c", ActivityType::Chat, 5, 5),
        ];

        let metrics = efficiency_metrics(&summarize(&activities));
        let coding = metrics[&ActivityType::Coding];
        assert_eq!(coding.avg_tokens, 85.0);
        assert_eq!(coding.avg_elapsed_ms, 60_000.0);
        assert_eq!(coding.tokens_per_minute, 85.0);

        let chat = metrics[&ActivityType::Chat];
        assert_eq!(chat.tokens_per_minute, 0.0);
    }

    #[test]
    fn test_type_distribution() {
        assert!(type_distribution(&[]).is_empty());

        let activities = vec![
            activity("a", ActivityType::Coding, 1, 1),
            activity("b", ActivityType::Coding, 1, 1),
            activity("c", ActivityType::Debugging, 1, 1),
            activity("d", ActivityType::Chat, 1, 1),
        ];
        let dist = type_distribution(&activities);
        assert_eq!(dist[&ActivityType::Coding], 50.0);
        assert_eq!(dist[&ActivityType::Debugging], 25.0);
        let sum: f64 = dist.values().sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_elapsed_is_kept() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let backwards = activity("a", ActivityType::Coding, 1, 1)
            .with_times(start, start - Duration::minutes(1));
        let summary = summarize(&[backwards]);
        assert_eq!(summary.total_elapsed_ms, -60_000);
        assert_eq!(
            efficiency_metrics(&summary)[&ActivityType::Coding].tokens_per_minute,
            0.0
        );
    }
}
