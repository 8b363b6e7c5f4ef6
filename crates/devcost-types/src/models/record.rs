//! Persisted usage record shape
//!
//! One JSON object per line, partitioned by day by the storage collaborator:
//!
//! ```json
//! {"timestamp":"2026-03-01T10:00:00Z","sessionId":"s1",
//!  "activity":{"type":"coding","content":"...","start":1772359200000,"end":1772359260000,
//!              "tokens":{"input":120,"output":80,"total":200}},
//!  "cost":{"input":0.00036,"output":0.0012,"total":0.00156,"currency":"USD","model":"claude-sonnet-4"}}
//! ```

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::activity::{Activity, ActivityType};
use super::usage::TokenUsage;

/// A priced, classified interaction as exchanged with storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub activity: RecordActivity,
    pub cost: RecordCost,
}

/// Activity part of a persisted record (timestamps as epoch milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordActivity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    pub tokens: TokenUsage,
}

/// Cost part of a persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub model: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl UsageRecord {
    /// Day partition this record belongs to (UTC)
    pub fn partition_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// File name of the day partition, e.g. `2026-03-01.jsonl`
    pub fn partition_file_name(&self) -> String {
        format!("{}.jsonl", self.partition_date().format("%Y-%m-%d"))
    }

    /// Rebuild the in-memory activity value
    ///
    /// Records do not carry an activity id, so one is derived from the
    /// session id and the record timestamp.
    pub fn to_activity(&self) -> Activity {
        let to_time = |ms: Option<i64>| {
            ms.filter(|ms| *ms != 0)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        };

        Activity {
            id: format!("{}:{}", self.session_id, self.timestamp.timestamp_millis()),
            activity_type: self.activity.activity_type,
            content: self.activity.content.clone(),
            start_time: to_time(self.activity.start),
            end_time: to_time(self.activity.end),
            tokens: self.activity.tokens,
        }
    }
}

impl RecordActivity {
    pub fn from_activity(activity: &Activity) -> Self {
        Self {
            activity_type: activity.activity_type,
            content: activity.content.clone(),
            start: activity.start_time.map(|t| t.timestamp_millis()),
            end: activity.end_time.map(|t| t.timestamp_millis()),
            tokens: activity.tokens,
        }
    }
}
