//! Activity classification
//!
//! Maps raw interaction text to one of the five activity categories by
//! weighted rule scoring. The highest score wins; ties resolve by
//! [`PRIORITY`]. Empty content and content with no signal classify as chat.

mod rules;
mod summary;

pub use rules::{CategoryRules, ClassifierRules, KEYWORD_WEIGHT, PATTERN_WEIGHT};
pub use summary::{
    efficiency_metrics, summarize, type_distribution, ActivitySummary, EfficiencyMetrics,
    TypeSummary,
};

use devcost_types::ActivityType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Tie-break order, highest priority first
pub const PRIORITY: [ActivityType; 5] = [
    ActivityType::Debugging,
    ActivityType::Coding,
    ActivityType::SpecDevelopment,
    ActivityType::Documentation,
    ActivityType::Chat,
];

/// Per-category scores for one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub activity_type: ActivityType,
    pub scores: BTreeMap<ActivityType, u32>,
}

impl ClassificationScores {
    pub fn score(&self, activity_type: ActivityType) -> u32 {
        self.scores.get(&activity_type).copied().unwrap_or(0)
    }
}

/// Stateless rule-based classifier
#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    rules: ClassifierRules,
}

impl Default for ActivityClassifier {
    fn default() -> Self {
        Self::new(ClassifierRules::builtin())
    }
}

impl ActivityClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn classify(&self, content: &str) -> ActivityType {
        self.classify_with_scores(content).activity_type
    }

    pub fn classify_batch<S: AsRef<str>>(&self, contents: &[S]) -> Vec<ActivityType> {
        contents.iter().map(|c| self.classify(c.as_ref())).collect()
    }

    pub fn classify_with_scores(&self, content: &str) -> ClassificationScores {
        let mut scores: BTreeMap<ActivityType, u32> =
            ActivityType::ALL.iter().map(|t| (*t, 0)).collect();

        if !content.trim().is_empty() {
            let lowered = content.to_lowercase();
            for category in self.rules.categories() {
                *scores.entry(category.activity_type).or_insert(0) +=
                    category.score(content, &lowered);
            }
        }

        let mut winner = ActivityType::Chat;
        let mut best = 0;
        for activity_type in PRIORITY {
            let score = scores.get(&activity_type).copied().unwrap_or(0);
            if score > best {
                winner = activity_type;
                best = score;
            }
        }

        trace!(activity_type = %winner, score = best, "Classified content");
        ClassificationScores {
            activity_type: winner,
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ErrorRegistry;

    fn classifier() -> ActivityClassifier {
        ActivityClassifier::default()
    }

    #[test]
    fn test_empty_and_neutral_content_is_chat() {
        let c = classifier();
        assert_eq!(c.classify(""), ActivityType::Chat);
        assert_eq!(c.classify("   "), ActivityType::Chat);
        assert_eq!(c.classify("the weather is nice today"), ActivityType::Chat);
    }

    #[test]
    fn test_builtin_categories() {
        let c = classifier();
        assert_eq!(
            c.classify("I get a panic with this stack trace when the test fails"),
            ActivityType::Debugging
        );
        assert_eq!(
            c.classify("Please implement a function that parses the config struct"),
            ActivityType::Coding
        );
        assert_eq!(
            c.classify("Draft the requirements and acceptance criteria for the export feature"),
            ActivityType::SpecDevelopment
        );
        assert_eq!(
            c.classify("Update the README and the changelog"),
            ActivityType::Documentation
        );
        assert_eq!(c.classify("Hello, thanks for the help!"), ActivityType::Chat);
    }

    #[test]
    fn test_chinese_content() {
        let c = classifier();
        assert_eq!(c.classify("程序运行时报错，帮我调试一下"), ActivityType::Debugging);
        assert_eq!(c.classify("请帮我更新项目文档和注释"), ActivityType::Documentation);
        assert_eq!(c.classify("你好"), ActivityType::Chat);
    }

    #[test]
    fn test_ties_follow_priority() {
        let registry = ErrorRegistry::builtin();
        let rules = ClassifierRules::empty()
            .with_category(&registry, ActivityType::Documentation, &[], &["shared"])
            .unwrap()
            .with_category(&registry, ActivityType::Coding, &[], &["shared"])
            .unwrap()
            .with_category(&registry, ActivityType::Debugging, &[], &["other"])
            .unwrap();
        let c = ActivityClassifier::new(rules);

        assert_eq!(c.classify("shared"), ActivityType::Coding);
        assert_eq!(c.classify("shared other"), ActivityType::Debugging);
    }

    #[test]
    fn test_scores_are_reported_for_every_type() {
        let scores = classifier().classify_with_scores("fix the bug in this function");
        assert_eq!(scores.scores.len(), ActivityType::ALL.len());
        assert!(scores.score(ActivityType::Debugging) > 0);
        assert!(scores.score(ActivityType::Coding) > 0);
        assert_eq!(scores.activity_type, ActivityType::Debugging);
    }

    #[test]
    fn test_batch_matches_single() {
        let c = classifier();
        let contents = ["Update the README", "hello", "segfault in the parser"];
        let batch = c.classify_batch(&contents);
        let single: Vec<_> = contents.iter().map(|s| c.classify(s)).collect();
        assert_eq!(batch, single);
        assert!(c.classify_batch::<&str>(&[]).is_empty());
    }
}
