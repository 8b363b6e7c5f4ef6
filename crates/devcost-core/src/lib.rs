//! devcost-core - Core library for devcost
//!
//! Token measurement, activity classification, multi-model pricing and
//! usage analytics, on top of a shared resilience layer (structured errors,
//! retry, circuit breaking).

pub mod analytics;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pricing;
pub mod records;
pub mod resilience;
pub mod tokens;
pub mod tracker;

pub use analytics::AnalyticsData;
pub use classifier::ActivityClassifier;
pub use config::Settings;
pub use error::{LoadError, LoadReport, LoadSeverity};
pub use pricing::{CostBreakdown, PricingEngine, PricingModel};
pub use resilience::{AppError, AppResult, ErrorCode, ErrorHandler, ErrorRegistry};
pub use tokens::{CalculationMethod, TokenCalculator};
pub use tracker::{CostRequest, RecordRequest, ReportData, ReportOptions, Tracker};
