//! Usage pattern detection
//!
//! Per-type averages and spread of token consumption, plus the categories
//! that stand out (most frequent, most expensive, most efficient).

use devcost_types::{Activity, ActivityType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::insights::generate_insights;
use crate::classifier::PRIORITY;

/// Statistics of one activity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypePattern {
    pub count: usize,
    pub total_tokens: u64,
    pub avg_tokens: f64,
    pub avg_elapsed_ms: f64,
    /// 0.0 when no positive elapsed time was recorded
    pub tokens_per_minute: f64,
    /// Population variance of per-activity total tokens.
    ///
    /// Reported without taking the square root, so the unit is tokens²,
    /// not a standard deviation.
    pub variability: f64,
}

/// Behavioral patterns over a batch of activities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePatterns {
    pub by_type: BTreeMap<ActivityType, TypePattern>,
    pub total_count: usize,
    pub total_tokens: u64,
    pub most_frequent: Option<ActivityType>,
    pub most_token_consuming: Option<ActivityType>,
    /// Lowest average tokens per activity
    pub most_token_efficient: Option<ActivityType>,
    pub insights: Vec<String>,
}

impl UsagePatterns {
    pub fn empty() -> Self {
        Self::default()
    }
}

pub fn analyze_usage_patterns(activities: &[Activity]) -> UsagePatterns {
    if activities.is_empty() {
        return UsagePatterns::empty();
    }

    let mut grouped: BTreeMap<ActivityType, Vec<&Activity>> = BTreeMap::new();
    for activity in activities {
        grouped.entry(activity.activity_type).or_default().push(activity);
    }

    let by_type: BTreeMap<ActivityType, TypePattern> = grouped
        .iter()
        .map(|(activity_type, group)| (*activity_type, type_pattern(group)))
        .collect();

    let mut patterns = UsagePatterns {
        total_count: activities.len(),
        total_tokens: activities.iter().map(|a| a.tokens.total()).sum(),
        most_frequent: pick(&by_type, |a, b| a.count > b.count),
        most_token_consuming: pick(&by_type, |a, b| a.total_tokens > b.total_tokens),
        most_token_efficient: pick(&by_type, |a, b| a.avg_tokens < b.avg_tokens),
        by_type,
        insights: Vec::new(),
    };
    patterns.insights = generate_insights(&patterns);
    patterns
}

fn type_pattern(group: &[&Activity]) -> TypePattern {
    let count = group.len();
    let n = count as f64;
    let total_tokens: u64 = group.iter().map(|a| a.tokens.total()).sum();
    let elapsed_ms: i64 = group.iter().map(|a| a.elapsed_ms()).sum();

    let avg_tokens = total_tokens as f64 / n;
    let variability = group
        .iter()
        .map(|a| {
            let delta = a.tokens.total() as f64 - avg_tokens;
            delta * delta
        })
        .sum::<f64>()
        / n;

    let tokens_per_minute = if elapsed_ms > 0 {
        total_tokens as f64 / (elapsed_ms as f64 / 60_000.0)
    } else {
        0.0
    };

    TypePattern {
        count,
        total_tokens,
        avg_tokens,
        avg_elapsed_ms: elapsed_ms as f64 / n,
        tokens_per_minute,
        variability,
    }
}

/// Type whose pattern beats all others under `better`, scanning in
/// priority order so ties resolve deterministically
fn pick<F>(by_type: &BTreeMap<ActivityType, TypePattern>, better: F) -> Option<ActivityType>
where
    F: Fn(&TypePattern, &TypePattern) -> bool,
{
    let mut best: Option<(ActivityType, &TypePattern)> = None;
    for activity_type in PRIORITY {
        let Some(pattern) = by_type.get(&activity_type) else {
            continue;
        };
        match best {
            Some((_, current)) if !better(pattern, current) => {}
            _ => best = Some((activity_type, pattern)),
        }
    }
    best.map(|(activity_type, _)| activity_type)
}
