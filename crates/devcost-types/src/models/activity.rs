use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::usage::TokenUsage;

/// Kind of development work an interaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    Coding,
    Debugging,
    Documentation,
    SpecDevelopment,
    Chat,
}

impl ActivityType {
    /// All variants in declaration order
    pub const ALL: [ActivityType; 5] = [
        ActivityType::Coding,
        ActivityType::Debugging,
        ActivityType::Documentation,
        ActivityType::SpecDevelopment,
        ActivityType::Chat,
    ];

    /// Stable wire name (matches the serde representation)
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Coding => "coding",
            ActivityType::Debugging => "debugging",
            ActivityType::Documentation => "documentation",
            ActivityType::SpecDevelopment => "spec-development",
            ActivityType::Chat => "chat",
        }
    }

    /// Human-readable label
    pub fn display_name(self) -> &'static str {
        match self {
            ActivityType::Coding => "Coding",
            ActivityType::Debugging => "Debugging",
            ActivityType::Documentation => "Documentation",
            ActivityType::SpecDevelopment => "Spec development",
            ActivityType::Chat => "Chat",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "coding" => Ok(Self::Coding),
            "debugging" => Ok(Self::Debugging),
            "documentation" => Ok(Self::Documentation),
            "spec-development" | "spec" => Ok(Self::SpecDevelopment),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// One classified, measured unit of AI interaction
///
/// Created once per observed interaction and treated as an immutable value
/// afterwards. `end_time >= start_time` is expected but not enforced, so
/// [`Activity::elapsed`] may be negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default)]
    pub content: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub tokens: TokenUsage,
}

impl Activity {
    pub fn new(
        id: impl Into<String>,
        activity_type: ActivityType,
        content: impl Into<String>,
        tokens: TokenUsage,
    ) -> Self {
        Self {
            id: id.into(),
            activity_type,
            content: content.into(),
            start_time: None,
            end_time: None,
            tokens,
        }
    }

    /// Attach start/end timestamps
    pub fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// `end - start`, or `None` when either timestamp is missing or zero
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end))
                if start.timestamp_millis() != 0 && end.timestamp_millis() != 0 =>
            {
                Some(end - start)
            }
            _ => None,
        }
    }

    /// Elapsed time in milliseconds (0 when unknown)
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().map(|d| d.num_milliseconds()).unwrap_or(0)
    }

    /// Best timestamp to place this activity on a timeline
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .filter(|t| t.timestamp_millis() != 0)
            .or_else(|| self.end_time.filter(|t| t.timestamp_millis() != 0))
    }
}
