//! Load reports for devcost-core
//!
//! Loaders (price tables, record files) degrade gracefully: entries that
//! cannot be used are skipped and described here instead of failing the
//! whole load.

use serde::Serialize;

use crate::resilience::{AppError, ErrorCode};

/// Severity level for problems found during a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSeverity {
    /// Non-critical, the load continued with degraded data
    Warning,
    /// Significant but not fatal
    Error,
    /// Nothing usable was loaded
    Fatal,
}

/// Individual entry in a load report
#[derive(Debug, Clone, Serialize)]
pub struct LoadError {
    pub source: String,
    pub message: String,
    pub severity: LoadSeverity,
    /// Actionable suggestion for user (optional)
    pub suggestion: Option<String>,
}

impl LoadError {
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: LoadSeverity::Warning,
            suggestion: None,
        }
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: LoadSeverity::Error,
            suggestion: None,
        }
    }

    pub fn fatal(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: LoadSeverity::Fatal,
            suggestion: None,
        }
    }

    /// Add an actionable suggestion to this entry
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// User-facing entry for an `AppError`, with a context-aware suggestion
    pub fn from_app_error(source: impl Into<String>, error: &AppError) -> Self {
        let source = source.into();
        let suggestion = match error.code() {
            ErrorCode::DataParseFailed => match error.context().parameters.get("line") {
                Some(line) => Some(format!("Inspect line: sed -n '{line}p' {source}")),
                None => Some("Validate JSON syntax with: jq . <file>".to_string()),
            },
            ErrorCode::DataNotFound => Some(format!("Check if file exists: ls {source}")),
            ErrorCode::DataIoFailed => Some(format!("Check permissions: chmod +r {source}")),
            _ => error.remediation().map(str::to_string),
        };

        Self {
            source,
            message: error.messages().en.clone(),
            severity: LoadSeverity::Error,
            suggestion,
        }
    }
}

/// Report of problems encountered during a load
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub errors: Vec<LoadError>,
    /// Entries (records or price models) that were accepted
    pub loaded: usize,
    /// Entries that were rejected and skipped
    pub skipped: usize,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::warning(source, message));
    }

    pub fn add_fatal(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::fatal(source, message));
    }

    /// Returns true if there are any fatal errors
    pub fn has_fatal_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == LoadSeverity::Fatal)
    }

    /// Returns true if there are any errors (including warnings)
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LoadError> {
        self.errors
            .iter()
            .filter(|e| e.severity == LoadSeverity::Warning)
    }

    /// Returns count by severity (warnings, errors, fatal)
    pub fn error_count(&self) -> (usize, usize, usize) {
        let count = |severity| self.errors.iter().filter(|e| e.severity == severity).count();
        (
            count(LoadSeverity::Warning),
            count(LoadSeverity::Error),
            count(LoadSeverity::Fatal),
        )
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: LoadReport) {
        self.errors.extend(other.errors);
        self.loaded += other.loaded;
        self.skipped += other.skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_report_severity_counting() {
        let mut report = LoadReport::new();
        report.add_warning("pricing.toml", "model 'x' skipped");
        report.add_error(LoadError::error("records.jsonl", "Parse error"));
        report.add_fatal("pricing.toml", "no valid models");

        assert_eq!(report.error_count(), (1, 1, 1));
        assert!(report.has_fatal_errors());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_load_report_merge() {
        let mut first = LoadReport::new();
        first.loaded = 10;

        let mut second = LoadReport::new();
        second.loaded = 20;
        second.skipped = 2;
        second.add_warning("test", "warning");

        first.merge(second);

        assert_eq!(first.loaded, 30);
        assert_eq!(first.skipped, 2);
        assert_eq!(first.errors.len(), 1);
    }

    #[test]
    fn test_from_app_error_suggests_line_inspection() {
        let err = AppError::new(ErrorCode::DataParseFailed, "expected value").with_parameter("line", 7);
        let entry = LoadError::from_app_error("2026-03-01.jsonl", &err);
        assert_eq!(entry.severity, LoadSeverity::Error);
        assert_eq!(
            entry.suggestion.as_deref(),
            Some("Inspect line: sed -n '7p' 2026-03-01.jsonl")
        );
    }
}
