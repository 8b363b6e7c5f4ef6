//! Classification rules
//!
//! Each category owns regex patterns (weight 3 when the pattern matches) and
//! case-insensitive keywords (weight 1 per keyword found). The built-in set
//! covers English and Chinese.

use devcost_types::ActivityType;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::resilience::{AppResult, ErrorCode, ErrorRegistry};

pub const PATTERN_WEIGHT: u32 = 3;
pub const KEYWORD_WEIGHT: u32 = 1;

/// Patterns and keywords for one category
#[derive(Debug, Clone)]
pub struct CategoryRules {
    pub activity_type: ActivityType,
    patterns: Vec<Regex>,
    /// Stored lowercased
    keywords: Vec<String>,
}

impl CategoryRules {
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Weighted score of `content`; `lowered` is `content` lowercased
    pub fn score(&self, content: &str, lowered: &str) -> u32 {
        let pattern_hits = self.patterns.iter().filter(|re| re.is_match(content)).count() as u32;
        let keyword_hits = self
            .keywords
            .iter()
            .filter(|kw| lowered.contains(kw.as_str()))
            .count() as u32;
        pattern_hits * PATTERN_WEIGHT + keyword_hits * KEYWORD_WEIGHT
    }
}

/// Rule set used by the classifier
#[derive(Debug, Clone, Default)]
pub struct ClassifierRules {
    categories: Vec<CategoryRules>,
}

static BUILTIN: Lazy<ClassifierRules> = Lazy::new(|| {
    let mut rules = ClassifierRules::empty();
    for (activity_type, patterns, keywords) in BUILTIN_TABLE {
        rules.categories.push(CategoryRules {
            activity_type: *activity_type,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p).expect("built-in classifier pattern is valid"))
                .collect(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        });
    }
    rules
});

type RuleRow = (ActivityType, &'static [&'static str], &'static [&'static str]);

const BUILTIN_TABLE: &[RuleRow] = &[
    (
        ActivityType::Debugging,
        &[
            r"(?i)\b(error|exception|traceback|stack ?trace|panic(ked)?|segfault)\b",
            r"(?i)\b(bug|crash(es|ed)?|fail(s|ed|ing|ure)?)\b",
            r"(?i)\bdebug(ging|ger)?\b",
            r"(?i)(not working|doesn't work|does not work|is broken)",
            r"(报错|错误|异常|崩溃|调试|修复|失败)",
        ],
        &[
            "fix",
            "issue",
            "undefined",
            "null pointer",
            "breakpoint",
            "wrong output",
            "问题",
            "排查",
        ],
    ),
    (
        ActivityType::Coding,
        &[
            r"```",
            r"(?i)\b(function|class|struct|impl|interface|module|method)\b",
            r"(?i)\b(implement|refactor|optimi[sz]e)\b",
            r"\w+\([^)]*\)\s*[{;]",
            r"(实现|重构|编写代码|函数|代码)",
        ],
        &[
            "code",
            "api",
            "variable",
            "compile",
            "unit test",
            "algorithm",
            "endpoint",
            "编程",
            "接口",
        ],
    ),
    (
        ActivityType::SpecDevelopment,
        &[
            r"(?i)\b(spec(ification)?s?|requirements?|user stor(y|ies))\b",
            r"(?i)\b(acceptance criteria|design doc(ument)?|architecture|rfc)\b",
            r"(需求|规格|规范|架构设计|验收标准)",
        ],
        &[
            "should support",
            "scope",
            "milestone",
            "use case",
            "non-goal",
            "设计",
        ],
    ),
    (
        ActivityType::Documentation,
        &[
            r"(?i)\b(readme|docs?|documentation|docstring|changelog|tutorial)\b",
            r"(?i)\b(document|write-?up|annotate)\b",
            r"(文档|注释|说明书|教程)",
        ],
        &["markdown", "wiki", "example usage", "rustdoc", "javadoc", "说明"],
    ),
    (
        ActivityType::Chat,
        &[
            r"(?i)^\s*(hi|hello|hey|thanks|thank you)\b",
            r"(你好|谢谢|请问)",
        ],
        &["how are you", "what do you think", "opinion", "chat", "聊聊"],
    ),
];

impl ClassifierRules {
    /// No categories; everything classifies as chat
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in English and Chinese rule set
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Add rules for a category, replacing any existing entry for it
    ///
    /// Fails with `ACTIVITY_CLASSIFICATION_FAILED` when a pattern does not
    /// compile.
    pub fn with_category(
        mut self,
        registry: &ErrorRegistry,
        activity_type: ActivityType,
        patterns: &[&str],
        keywords: &[&str],
    ) -> AppResult<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    registry
                        .create(
                            ErrorCode::ActivityClassificationFailed,
                            format!("invalid pattern for {activity_type}: {e}"),
                        )
                        .with_component("classifier")
                        .with_parameter("pattern", *p)
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        self.categories.retain(|c| c.activity_type != activity_type);
        self.categories.push(CategoryRules {
            activity_type,
            patterns: compiled,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        });
        Ok(self)
    }

    pub fn categories(&self) -> &[CategoryRules] {
        &self.categories
    }

    pub fn get(&self, activity_type: ActivityType) -> Option<&CategoryRules> {
        self.categories
            .iter()
            .find(|c| c.activity_type == activity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_type() {
        let rules = ClassifierRules::builtin();
        for activity_type in ActivityType::ALL {
            assert!(rules.get(activity_type).is_some(), "missing {activity_type}");
        }
    }

    #[test]
    fn test_score_weights() {
        let rules = ClassifierRules::empty()
            .with_category(
                &ErrorRegistry::builtin(),
                ActivityType::Debugging,
                &[r"(?i)\berror\b"],
                &["Fix", "stack"],
            )
            .unwrap();
        let debugging = rules.get(ActivityType::Debugging).unwrap();
        let content = "Error: please FIX this";
        assert_eq!(debugging.score(content, &content.to_lowercase()), 4);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = ClassifierRules::empty()
            .with_category(
                &ErrorRegistry::builtin(),
                ActivityType::Coding,
                &["(unclosed"],
                &[],
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ActivityClassificationFailed);
        assert_eq!(err.context().parameters["pattern"], "(unclosed");
    }

    #[test]
    fn test_with_category_replaces_existing() {
        let registry = ErrorRegistry::builtin();
        let rules = ClassifierRules::builtin()
            .with_category(&registry, ActivityType::Chat, &[], &["ping"])
            .unwrap();
        let chat: Vec<_> = rules
            .categories()
            .iter()
            .filter(|c| c.activity_type == ActivityType::Chat)
            .collect();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].keywords(), ["ping".to_string()]);
    }
}
