//! JSONL record codec
//!
//! Records are stored one JSON object per line, partitioned by day
//! (`YYYY-MM-DD.jsonl`). Loading is tolerant: malformed lines and records
//! with impossible costs are skipped and described in the [`LoadReport`].

use devcost_types::{Activity, UsageRecord};
use std::io::BufRead;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, trace, warn};

use crate::error::{LoadError, LoadReport};
use crate::resilience::{AppError, AppResult, ErrorCode, ErrorRegistry};

/// Lines scanned per file before giving up on the rest
pub const MAX_LINES: usize = 1_000_000;

/// Records loaded from one source
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<UsageRecord>,
    pub report: LoadReport,
}

impl RecordBatch {
    pub fn activities(&self) -> Vec<Activity> {
        self.records.iter().map(UsageRecord::to_activity).collect()
    }
}

/// Incremental line parser shared by the sync and async loaders
struct LineParser<'a> {
    source: &'a str,
    registry: &'a ErrorRegistry,
    batch: RecordBatch,
    line_number: usize,
}

impl<'a> LineParser<'a> {
    fn new(source: &'a str, registry: &'a ErrorRegistry) -> Self {
        Self {
            source,
            registry,
            batch: RecordBatch::default(),
            line_number: 0,
        }
    }

    /// Feed one raw line; returns false once the line limit is reached
    fn push(&mut self, raw: &[u8]) -> bool {
        self.line_number += 1;
        if self.line_number > MAX_LINES {
            warn!(
                source = self.source,
                lines = self.line_number,
                "Record scan hit line limit, terminating early"
            );
            self.batch.report.add_warning(
                self.source,
                format!("stopped after {MAX_LINES} lines"),
            );
            return false;
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                let err = self
                    .registry
                    .create(ErrorCode::DataParseFailed, format!("line is not valid UTF-8: {e}"))
                    .with_component("records")
                    .with_operation("parse_line");
                self.skip(err);
                return true;
            }
        };
        if line.is_empty() {
            return true;
        }

        match parse_line(line, self.registry) {
            Ok(record) => {
                self.batch.records.push(record);
                self.batch.report.loaded += 1;
            }
            Err(err) => self.skip(err),
        }
        true
    }

    fn skip(&mut self, err: AppError) {
        let err = err.with_parameter("line", self.line_number);
        trace!(
            source = self.source,
            line = self.line_number,
            error = %err,
            "Skipping malformed record line"
        );
        self.batch
            .report
            .add_error(LoadError::from_app_error(self.source, &err));
        self.batch.report.skipped += 1;
    }

    fn finish(self) -> RecordBatch {
        if self.batch.report.skipped > 0 {
            warn!(
                source = self.source,
                skipped = self.batch.report.skipped,
                loaded = self.batch.report.loaded,
                "Skipped malformed record lines"
            );
        } else {
            debug!(source = self.source, loaded = self.batch.report.loaded, "Loaded records");
        }
        self.batch
    }
}

/// Parse and validate one record line
pub fn parse_line(line: &str, registry: &ErrorRegistry) -> AppResult<UsageRecord> {
    let record: UsageRecord = serde_json::from_str(line).map_err(|e| {
        registry
            .create(ErrorCode::DataParseFailed, e.to_string())
            .with_component("records")
            .with_operation("parse_line")
    })?;

    let cost = &record.cost;
    let costs = [("input", cost.input), ("output", cost.output), ("total", cost.total)];
    if let Some((field, value)) = costs.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
        return Err(registry
            .create(
                ErrorCode::ActivityInvalidRecord,
                format!("cost.{field} must be a non-negative number, got {value}"),
            )
            .with_component("records")
            .with_operation("parse_line")
            .with_session_id(record.session_id.clone()));
    }

    Ok(record)
}

/// Parse records from a buffered reader, skipping bad lines (including
/// lines that are not valid UTF-8)
pub fn parse_records<R: BufRead>(
    reader: R,
    source: &str,
    registry: &ErrorRegistry,
) -> AppResult<RecordBatch> {
    let mut parser = LineParser::new(source, registry);
    for line in reader.split(b'\n') {
        let line = line.map_err(|e| {
            AppError::from(e)
                .with_component("records")
                .with_operation("parse_records")
                .with_parameter("source", source)
        })?;
        if !parser.push(&line) {
            break;
        }
    }
    Ok(parser.finish())
}

/// Load one record file
///
/// Fails with `DATA_NOT_FOUND` when the file is missing and `DATA_IO_FAILED`
/// when it cannot be read; bad lines only show up in the report.
pub async fn load_file(path: &Path, registry: &ErrorRegistry) -> AppResult<RecordBatch> {
    let source = path.display().to_string();
    let io_error = |e: std::io::Error| {
        AppError::from(e)
            .with_component("records")
            .with_operation("load_file")
            .with_parameter("path", source.clone())
    };

    let file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut lines = BufReader::new(file).split(b'\n');
    let mut parser = LineParser::new(&source, registry);

    while let Some(line) = lines.next_segment().await.map_err(io_error)? {
        if !parser.push(&line) {
            break;
        }
    }
    Ok(parser.finish())
}

/// Serialize a record as one JSONL line (without the trailing newline)
pub fn to_json_line(record: &UsageRecord) -> AppResult<String> {
    serde_json::to_string(record).map_err(|e| {
        AppError::from(e)
            .with_component("records")
            .with_operation("to_json_line")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcost_types::ActivityType;
    use std::io::Write;

    const GOOD: &str = r#"{"timestamp":"2026-03-01T10:00:00Z","sessionId":"s1","activity":{"type":"coding","content":"impl","start":1772359200000,"end":1772359260000,"tokens":{"input":100,"output":50}},"cost":{"input":0.0003,"output":0.00075,"total":0.00105,"currency":"USD","model":"claude-sonnet-4"}}"#;
    const NEGATIVE: &str = r#"{"timestamp":"2026-03-01T11:00:00Z","sessionId":"s2","activity":{"type":"chat","tokens":{"input":1,"output":1}},"cost":{"input":-1.0,"output":0.0,"total":-1.0,"model":"m"}}"#;

    fn registry() -> ErrorRegistry {
        ErrorRegistry::builtin()
    }

    #[test]
    fn test_parse_records_skips_bad_lines() {
        let input = format!("{GOOD}\nnot json\n\n{NEGATIVE}\n{GOOD}\n");
        let batch = parse_records(input.as_bytes(), "2026-03-01.jsonl", &registry()).unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.report.loaded, 2);
        assert_eq!(batch.report.skipped, 2);
        assert_eq!(batch.report.errors.len(), 2);
        assert_eq!(
            batch.report.errors[0].suggestion.as_deref(),
            Some("Inspect line: sed -n '2p' 2026-03-01.jsonl")
        );
        assert!(batch.report.errors[1].message.contains("Invalid activity record"));
    }

    #[test]
    fn test_activities_from_records() {
        let batch = parse_records(GOOD.as_bytes(), "inline", &registry()).unwrap();
        let activities = batch.activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::Coding);
        assert_eq!(activities[0].tokens.total(), 150);
        assert_eq!(activities[0].elapsed_ms(), 60_000);
    }

    #[test]
    fn test_json_line_round_trip() {
        let record = parse_line(GOOD, &registry()).unwrap();
        let line = to_json_line(&record).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(parse_line(&line, &registry()).unwrap(), record);
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{GOOD}").unwrap();
        writeln!(file, "{{\"truncated\":").unwrap();

        let batch = load_file(file.path(), &registry()).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.report.skipped, 1);
    }

    fn with_invalid_utf8_line() -> Vec<u8> {
        let mut input = Vec::new();
        input.extend_from_slice(GOOD.as_bytes());
        input.extend_from_slice(b"\n\xff\xfe bad\n");
        input.extend_from_slice(GOOD.as_bytes());
        input.push(b'\n');
        input
    }

    #[test]
    fn test_parse_records_skips_invalid_utf8() {
        let input = with_invalid_utf8_line();
        let batch = parse_records(input.as_slice(), "inline", &registry()).unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.report.loaded, 2);
        assert_eq!(batch.report.skipped, 1);
        assert!(batch.report.errors[0].message.contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_load_file_skips_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&with_invalid_utf8_line()).unwrap();

        let batch = load_file(file.path(), &registry()).await.unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.report.skipped, 1);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_file(Path::new("/nonexistent/2026-03-01.jsonl"), &registry())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DataNotFound);
    }
}
