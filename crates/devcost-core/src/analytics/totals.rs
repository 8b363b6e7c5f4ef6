//! Per-type totals and rankings

use devcost_types::{Activity, ActivityType, TokenUsage, UsageRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::classifier::{summarize, ActivitySummary};

/// Sum of token usage per activity type
pub fn token_usage_by_activity(activities: &[Activity]) -> BTreeMap<ActivityType, TokenUsage> {
    let mut usage: BTreeMap<ActivityType, TokenUsage> = BTreeMap::new();
    for activity in activities {
        *usage.entry(activity.activity_type).or_default() += activity.tokens;
    }
    usage
}

/// Counts, tokens and elapsed time per type and overall
pub fn activity_totals(activities: &[Activity]) -> ActivitySummary {
    summarize(activities)
}

/// The `n` activities with the most total tokens, descending
///
/// Ties keep their input order; `n >= len` returns every activity sorted.
pub fn top_activities_by_tokens(activities: &[Activity], n: usize) -> Vec<&Activity> {
    let mut sorted: Vec<&Activity> = activities.iter().collect();
    sorted.sort_by_key(|a| Reverse(a.tokens.total()));
    sorted.truncate(n);
    sorted
}

/// Cost totals of one activity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub count: usize,
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

/// Per-type cost totals of priced records
pub fn cost_by_activity(records: &[UsageRecord]) -> BTreeMap<ActivityType, CostTotals> {
    let mut totals: BTreeMap<ActivityType, CostTotals> = BTreeMap::new();
    for record in records {
        let entry = totals.entry(record.activity.activity_type).or_default();
        entry.count += 1;
        entry.input += record.cost.input;
        entry.output += record.cost.output;
        entry.total += record.cost.total;
    }
    totals
}
