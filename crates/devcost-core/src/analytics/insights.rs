//! Textual insights
//!
//! Fixed templates naming the categories that stand out in a batch.

use super::patterns::UsagePatterns;

/// Generate insights from detected patterns
///
/// One line each for the most frequent, the most token-consuming and the
/// most token-efficient category. Empty patterns yield no insights.
pub fn generate_insights(patterns: &UsagePatterns) -> Vec<String> {
    let mut insights = Vec::new();
    if patterns.total_count == 0 {
        return insights;
    }

    if let Some(activity_type) = patterns.most_frequent {
        if let Some(p) = patterns.by_type.get(&activity_type) {
            let pct = p.count as f64 * 100.0 / patterns.total_count as f64;
            insights.push(format!(
                "Most frequent activity: {} ({} activities, {:.1}% of total)",
                activity_type.display_name(),
                p.count,
                pct
            ));
        }
    }

    if let Some(activity_type) = patterns.most_token_consuming {
        if let Some(p) = patterns.by_type.get(&activity_type) {
            let pct = if patterns.total_tokens > 0 {
                p.total_tokens as f64 * 100.0 / patterns.total_tokens as f64
            } else {
                0.0
            };
            insights.push(format!(
                "Highest token consumption: {} ({} tokens, {:.1}% of total)",
                activity_type.display_name(),
                p.total_tokens,
                pct
            ));
        }
    }

    if let Some(activity_type) = patterns.most_token_efficient {
        if let Some(p) = patterns.by_type.get(&activity_type) {
            insights.push(format!(
                "Most token-efficient activity: {} ({:.0} tokens per activity on average)",
                activity_type.display_name(),
                p.avg_tokens
            ));
        }
    }

    insights
}
