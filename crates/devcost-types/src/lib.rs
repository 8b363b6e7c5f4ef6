//! devcost-types - Shared data types for devcost
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - devcost-core (accounting pipeline)
//! - devcost (CLI)

pub mod models;

pub use models::{Activity, ActivityType, RecordActivity, RecordCost, TokenUsage, UsageRecord};
