//! Accounting facade
//!
//! [`Tracker`] owns one instance of every pipeline component, built from
//! [`Settings`] around a shared [`ErrorRegistry`]. Failures surfacing from
//! any operation pass through the [`ErrorHandler`] before reaching the
//! caller, so they are sanitized, logged and fanned out to listeners.

use chrono::{DateTime, Duration, Utc};
use devcost_types::{Activity, ActivityType, RecordActivity, RecordCost, TokenUsage, UsageRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analytics::{default_window, AnalyticsData};
use crate::classifier::{efficiency_metrics, type_distribution, ActivityClassifier, EfficiencyMetrics};
use crate::config::Settings;
use crate::pricing::{CostBreakdown, PricingEngine, PricingLoadReport, DEFAULT_CURRENCY};
use crate::records::{self, RecordBatch};
use crate::resilience::{
    AppResult, ErrorCause, ErrorCode, ErrorHandler, ErrorRegistry, RetryManager, Sanitizer,
};
use crate::tokens::{CalculationMethod, MethodComparison, TokenCalculator, TokenDistribution};

/// Default number of activities listed in analytics and reports
pub const DEFAULT_TOP_N: usize = 10;

/// Result of a token measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenReport {
    pub tokens: u64,
    /// Method as requested (`auto` stays `auto`)
    pub method: CalculationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<TokenDistribution>,
}

/// Inputs of [`Tracker::cost`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostRequest {
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// `None` prices with the default model
    pub model: Option<String>,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub batch: bool,
}

impl CostRequest {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_cache(mut self, read_tokens: i64, write_tokens: i64) -> Self {
        self.cache_read_tokens = read_tokens;
        self.cache_write_tokens = write_tokens;
        self
    }

    pub fn with_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    fn uses_cache(&self) -> bool {
        self.cache_read_tokens != 0 || self.cache_write_tokens != 0
    }
}

/// One observed interaction, fed to [`Tracker::record`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub session_id: String,
    pub prompt: String,
    pub response: String,
    pub model: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RecordRequest {
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            response: response.into(),
            model: None,
            start: None,
            end: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

/// Filters and sizing for [`Tracker::report`]
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Inclusive lower bound on record timestamps
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on record timestamps
    pub until: Option<DateTime<Utc>>,
    pub window: Duration,
    pub top_n: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            window: default_window(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One activity type in a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub activity_type: ActivityType,
    pub count: usize,
    pub tokens: TokenUsage,
    pub cost: f64,
    /// Share of all activities, in percent
    pub share: f64,
}

/// Report contents, ready for an external renderer
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub total_tokens: TokenUsage,
    pub total_cost: f64,
    pub currency: String,
    pub rows: Vec<ReportRow>,
    pub efficiency: BTreeMap<ActivityType, EfficiencyMetrics>,
    pub analytics: AnalyticsData,
}

pub struct Tracker {
    settings: Settings,
    registry: Arc<ErrorRegistry>,
    handler: Arc<ErrorHandler>,
    calculator: TokenCalculator,
    classifier: ActivityClassifier,
    pricing: PricingEngine,
}

impl Tracker {
    /// Build every component from `settings`; the price table starts with the
    /// built-in tiers
    pub fn new(settings: Settings) -> AppResult<Self> {
        let registry = Arc::new(ErrorRegistry::builtin());
        let calculator = TokenCalculator::new(settings.tokens.clone(), Arc::clone(&registry))?;
        Ok(Self::with_calculator(settings, registry, calculator))
    }

    /// Build around an existing calculator (custom counters, tests)
    pub fn with_calculator(
        settings: Settings,
        registry: Arc<ErrorRegistry>,
        calculator: TokenCalculator,
    ) -> Self {
        let handler = ErrorHandler::new(
            Arc::clone(&registry),
            Sanitizer::default(),
            settings.circuit_breaker.to_config(),
        )
        .with_retry_manager(RetryManager::new())
        .with_default_policy(settings.retry.to_policy());

        Self {
            pricing: PricingEngine::new(Arc::clone(&registry)),
            classifier: ActivityClassifier::default(),
            handler: Arc::new(handler),
            calculator,
            registry,
            settings,
        }
    }

    /// Load settings from `config_path` and the price table they point to
    ///
    /// A relative price table path resolves against the directory holding
    /// the config file.
    pub fn open(config_path: &Path) -> AppResult<(Self, Option<PricingLoadReport>)> {
        let settings = Settings::load(config_path, &ErrorRegistry::builtin())?;
        let pricing_path = settings.pricing_path(config_path.parent());
        let tracker = Self::new(settings)?;

        let report = match pricing_path {
            Some(path) => Some(tracker.load_pricing(&path)?),
            None => None,
        };
        info!(
            config = %config_path.display(),
            models = tracker.pricing.models().len(),
            "Tracker ready"
        );
        Ok((tracker, report))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.registry
    }

    pub fn handler(&self) -> &Arc<ErrorHandler> {
        &self.handler
    }

    pub fn calculator(&self) -> &TokenCalculator {
        &self.calculator
    }

    pub fn classifier(&self) -> &ActivityClassifier {
        &self.classifier
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// Replace the price table from a file
    pub fn load_pricing(&self, path: &Path) -> AppResult<PricingLoadReport> {
        self.observe(self.pricing.load_from_config(path))
    }

    /// Measure `text`; `None` uses the configured preferred method
    pub fn calculate(
        &self,
        text: &str,
        method: Option<CalculationMethod>,
        with_distribution: bool,
    ) -> AppResult<TokenReport> {
        let method = method.unwrap_or(self.settings.tokens.preferred_method);
        let tokens = self.observe(self.calculator.calculate_tokens(text, method))?;

        Ok(TokenReport {
            tokens,
            method,
            distribution: with_distribution
                .then(|| self.calculator.analyze_token_distribution(text)),
        })
    }

    /// Measure everything read from `reader`
    pub fn calculate_reader<R: Read>(
        &self,
        mut reader: R,
        method: Option<CalculationMethod>,
        with_distribution: bool,
    ) -> AppResult<TokenReport> {
        let mut text = String::new();
        if let Err(e) = reader.read_to_string(&mut text) {
            let code = if e.kind() == io::ErrorKind::InvalidData {
                ErrorCode::TokenInvalidText
            } else {
                ErrorCode::DataIoFailed
            };
            let err = self
                .registry
                .create(code, e.to_string())
                .with_component("tracker")
                .with_operation("calculate_reader")
                .with_cause(ErrorCause::external(&e));
            return Err(self.handler.handle(err));
        }
        self.calculate(&text, method, with_distribution)
    }

    pub fn compare(&self, text: &str) -> AppResult<MethodComparison> {
        self.observe(self.calculator.compare_calculation_methods(text))
    }

    /// Price a request
    ///
    /// Cache pools are priced when either cache count is non-zero; the batch
    /// discount applies on top.
    pub fn cost(&self, request: &CostRequest) -> AppResult<CostBreakdown> {
        let model = request.model.as_deref();
        let breakdown = if request.uses_cache() {
            self.pricing.calculate_cost_with_cache_and_batch(
                request.input_tokens,
                request.output_tokens,
                request.cache_read_tokens,
                request.cache_write_tokens,
                model,
                request.batch,
            )
        } else {
            self.pricing.calculate_cost_with_batch_discount(
                request.input_tokens,
                request.output_tokens,
                model,
                request.batch,
            )
        };
        self.observe(breakdown)
    }

    /// Analytics with the default window and top-N
    pub fn analyze(&self, activities: &[Activity]) -> AnalyticsData {
        AnalyticsData::compute(activities, default_window(), DEFAULT_TOP_N)
    }

    pub fn analyze_with(&self, activities: &[Activity], window: Duration, top_n: usize) -> AnalyticsData {
        AnalyticsData::compute(activities, window, top_n)
    }

    /// Aggregate priced records into report data
    ///
    /// Fails with `REPORT_GENERATION_FAILED` when the selected records mix
    /// currencies.
    pub fn report(&self, records: &[UsageRecord], options: &ReportOptions) -> AppResult<ReportData> {
        let selected: Vec<&UsageRecord> = records
            .iter()
            .filter(|r| options.since.map_or(true, |since| r.timestamp >= since))
            .filter(|r| options.until.map_or(true, |until| r.timestamp < until))
            .collect();

        let mut currencies = selected.iter().map(|r| r.cost.currency.as_str());
        let currency = currencies.next().unwrap_or(DEFAULT_CURRENCY).to_string();
        if let Some(other) = currencies.find(|c| *c != currency) {
            let err = self
                .registry
                .create(
                    ErrorCode::ReportGenerationFailed,
                    format!("records mix currencies ({currency}, {other})"),
                )
                .with_component("tracker")
                .with_operation("report");
            return Err(self.handler.handle(err));
        }

        let activities: Vec<Activity> = selected.iter().map(|r| r.to_activity()).collect();
        let analytics = AnalyticsData::compute(&activities, options.window, options.top_n);
        let shares = type_distribution(&activities);

        let mut costs: BTreeMap<ActivityType, f64> = BTreeMap::new();
        for record in &selected {
            *costs.entry(record.activity.activity_type).or_insert(0.0) += record.cost.total;
        }

        let rows = analytics
            .totals
            .by_type
            .iter()
            .map(|(activity_type, summary)| ReportRow {
                activity_type: *activity_type,
                count: summary.count,
                tokens: summary.tokens,
                cost: costs.get(activity_type).copied().unwrap_or(0.0),
                share: shares.get(activity_type).copied().unwrap_or(0.0),
            })
            .collect();

        debug!(records = selected.len(), "Built report");
        Ok(ReportData {
            generated_at: Utc::now(),
            period_start: selected.iter().map(|r| r.timestamp).min(),
            period_end: selected.iter().map(|r| r.timestamp).max(),
            record_count: selected.len(),
            total_tokens: analytics.totals.total_tokens,
            total_cost: costs.values().sum(),
            currency,
            rows,
            efficiency: efficiency_metrics(&analytics.totals),
            analytics,
        })
    }

    /// Run the full pipeline for one interaction
    ///
    /// Prompt and response are measured separately (input and output
    /// tokens), the concatenation is classified, and the usage is priced
    /// with the requested or default model. A retryable measurement failure
    /// is retried with estimation.
    pub async fn record(&self, request: &RecordRequest) -> AppResult<UsageRecord> {
        let input = self.count(&request.prompt).await?;
        let output = self.count(&request.response).await?;
        let activity_type = self
            .classifier
            .classify(&format!("{}\n{}", request.prompt, request.response));

        let cost = self.observe(self.pricing.calculate_basic_cost(
            saturating_i64(input),
            saturating_i64(output),
            request.model.as_deref(),
        ))?;

        let timestamp = request.end.or(request.start).unwrap_or_else(Utc::now);
        let mut activity = Activity::new(
            format!("{}:{}", request.session_id, timestamp.timestamp_millis()),
            activity_type,
            request.prompt.clone(),
            TokenUsage::new(input, output),
        );
        activity.start_time = request.start;
        activity.end_time = request.end;

        debug!(
            session = %request.session_id,
            activity = %activity_type,
            tokens = activity.tokens.total(),
            cost = cost.total_cost(),
            "Recorded activity"
        );

        Ok(UsageRecord {
            timestamp,
            session_id: request.session_id.clone(),
            activity: RecordActivity::from_activity(&activity),
            cost: RecordCost {
                input: cost.input_cost(),
                output: cost.output_cost(),
                total: cost.total_cost(),
                currency: cost.currency().to_string(),
                model: cost.model_name().to_string(),
            },
        })
    }

    /// Load one JSONL record file
    pub async fn load_records(&self, path: &Path) -> AppResult<RecordBatch> {
        self.observe(records::load_file(path, &self.registry).await)
    }

    /// Token count for one side of an interaction; empty text counts as 0
    async fn count(&self, text: &str) -> AppResult<u64> {
        if text.is_empty() {
            return Ok(0);
        }
        let method = self.settings.tokens.preferred_method;
        match self.calculator.calculate_tokens(text, method) {
            Ok(tokens) => Ok(tokens),
            Err(err) => {
                self.handler
                    .handle_with_recovery(err, || async {
                        self.calculator
                            .calculate_tokens(text, CalculationMethod::Estimation)
                    })
                    .await
            }
        }
    }

    fn observe<T>(&self, result: AppResult<T>) -> AppResult<T> {
        result.map_err(|err| self.handler.handle(err))
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenizerConfig;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn estimation_tracker() -> Tracker {
        let settings = Settings {
            tokens: TokenizerConfig {
                preferred_method: CalculationMethod::Estimation,
                ..TokenizerConfig::default()
            },
            ..Settings::default()
        };
        let registry = Arc::new(ErrorRegistry::builtin());
        let calculator =
            TokenCalculator::with_counter(settings.tokens.clone(), Arc::clone(&registry), None)
                .unwrap();
        Tracker::with_calculator(settings, registry, calculator)
    }

    fn record(day: u32, activity_type: ActivityType, total: f64, currency: &str) -> UsageRecord {
        UsageRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            session_id: format!("s{day}"),
            activity: RecordActivity {
                activity_type,
                content: String::new(),
                start: None,
                end: None,
                tokens: TokenUsage::new(100, 50),
            },
            cost: RecordCost {
                input: total / 2.0,
                output: total / 2.0,
                total,
                currency: currency.to_string(),
                model: "claude-sonnet-4".to_string(),
            },
        }
    }

    #[test]
    fn test_calculate_with_distribution() {
        let tracker = estimation_tracker();
        let report = tracker.calculate("Hello 世界", None, true).unwrap();
        assert_eq!(report.tokens, 3);
        assert_eq!(report.method, CalculationMethod::Estimation);
        let distribution = report.distribution.unwrap();
        assert_eq!(distribution.english_chars, 6);
        assert_eq!(distribution.chinese_chars, 2);

        let plain = tracker
            .calculate_reader("Hello 世界".as_bytes(), None, false)
            .unwrap();
        assert_eq!(plain.tokens, 3);
        assert!(plain.distribution.is_none());
    }

    #[test]
    fn test_errors_reach_listeners() {
        let tracker = estimation_tracker();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        tracker
            .handler()
            .add_listener(Arc::new(move |_: &crate::resilience::AppError| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));

        let err = tracker.calculate("", None, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalidText);
        // no runtime: listeners run inline
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cost_options() {
        let tracker = estimation_tracker();

        let basic = tracker.cost(&CostRequest::new(1_000_000, 1_000_000)).unwrap();
        assert_eq!(basic.model_name(), "claude-sonnet-4");
        assert!((basic.total_cost() - 18.0).abs() < 1e-9);

        let batch = tracker
            .cost(&CostRequest::new(1_000_000, 1_000_000).with_batch(true))
            .unwrap();
        assert!((batch.total_cost() - 9.0).abs() < 1e-9);

        let cached = tracker
            .cost(
                &CostRequest::new(1_000_000, 0)
                    .with_cache(1_000_000, 0)
                    .with_batch(true),
            )
            .unwrap();
        // (3.0 + 0.3) × 0.5
        assert!((cached.total_cost() - 1.65).abs() < 1e-9);
        assert!((cached.cache_costs().unwrap().read - 0.15).abs() < 1e-9);

        let err = tracker
            .cost(&CostRequest::new(1, 1).with_model("gpt-unknown"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CostInvalidPricingModel);
    }

    #[test]
    fn test_report_filters_and_totals() {
        let tracker = estimation_tracker();
        let records = vec![
            record(1, ActivityType::Coding, 1.0, "USD"),
            record(2, ActivityType::Coding, 2.0, "USD"),
            record(3, ActivityType::Chat, 0.5, "USD"),
            record(9, ActivityType::Debugging, 4.0, "USD"),
        ];
        let options = ReportOptions {
            since: Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap()),
            ..ReportOptions::default()
        };

        let report = tracker.report(&records, &options).unwrap();
        assert_eq!(report.record_count, 3);
        assert!((report.total_cost - 3.5).abs() < 1e-9);
        assert_eq!(report.total_tokens.total(), 450);
        assert_eq!(report.currency, "USD");
        assert_eq!(report.rows.len(), 2);

        let coding = report
            .rows
            .iter()
            .find(|r| r.activity_type == ActivityType::Coding)
            .unwrap();
        assert_eq!(coding.count, 2);
        assert!((coding.cost - 3.0).abs() < 1e-9);
        assert!((coding.share - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.period_end, Some(records[2].timestamp));
    }

    #[test]
    fn test_report_rejects_mixed_currencies() {
        let tracker = estimation_tracker();
        let records = vec![
            record(1, ActivityType::Coding, 1.0, "USD"),
            record(2, ActivityType::Chat, 1.0, "EUR"),
        ];
        let err = tracker
            .report(&records, &ReportOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReportGenerationFailed);
    }

    #[test]
    fn test_empty_report() {
        let report = estimation_tracker()
            .report(&[], &ReportOptions::default())
            .unwrap();
        assert_eq!(report.record_count, 0);
        assert!(report.rows.is_empty());
        assert_eq!(report.currency, DEFAULT_CURRENCY);
        assert_eq!(report.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_record_runs_full_pipeline() {
        let tracker = estimation_tracker();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let request = RecordRequest::new(
            "session-1",
            "Fix the bug: the parser panics with an error on empty input",
            "",
        )
        .with_model("claude-haiku-3-5")
        .with_times(start, start + Duration::minutes(2));

        let record = tracker.record(&request).await.unwrap();
        assert_eq!(record.session_id, "session-1");
        assert_eq!(record.activity.activity_type, ActivityType::Debugging);
        assert_eq!(record.activity.tokens.output(), 0);
        assert!(record.activity.tokens.input() > 0);
        assert_eq!(record.cost.model, "claude-haiku-3-5");
        assert!((record.cost.total - record.cost.input - record.cost.output).abs() < 1e-12);
        assert_eq!(record.partition_file_name(), "2026-03-01.jsonl");
        assert_eq!(record.to_activity().elapsed_ms(), 120_000);
    }
}
