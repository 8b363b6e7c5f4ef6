//! Statistics over batches of classified activities
//!
//! Totals per type, usage patterns with textual insights, frequency
//! histograms and cost roll-ups. Every function is pure; callers hand in
//! the batch they want analyzed.

use chrono::Duration;
use devcost_types::Activity;
use serde::Serialize;

use crate::classifier::ActivitySummary;

pub mod frequency;
pub mod insights;
pub mod patterns;
pub mod totals;


pub use frequency::{activity_frequency, ActivityFrequency};
pub use insights::generate_insights;
pub use patterns::{analyze_usage_patterns, TypePattern, UsagePatterns};
pub use totals::{
    activity_totals, cost_by_activity, token_usage_by_activity, top_activities_by_tokens,
    CostTotals,
};

/// Default frequency window
pub fn default_window() -> Duration {
    Duration::days(1)
}

/// Complete analytics for a batch
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsData {
    pub totals: ActivitySummary,
    pub patterns: UsagePatterns,
    pub frequency: ActivityFrequency,
    /// Highest-consuming activities, descending
    pub top_activities: Vec<Activity>,
}

impl AnalyticsData {
    /// Compute every analysis over `activities`
    pub fn compute(activities: &[Activity], window: Duration, top_n: usize) -> Self {
        Self {
            totals: activity_totals(activities),
            patterns: analyze_usage_patterns(activities),
            frequency: activity_frequency(activities, window),
            top_activities: top_activities_by_tokens(activities, top_n)
                .into_iter()
                .cloned()
                .collect(),
        }
    }
}
