//! Data models shared between the accounting core and its collaborators

pub mod activity;
pub mod record;
pub mod usage;

pub use activity::{Activity, ActivityType};
pub use record::{RecordActivity, RecordCost, UsageRecord};
pub use usage::TokenUsage;
