//! Argument helpers and output formatting for the devcost commands
//!
//! Every formatter renders either a comfy-table (human) or pretty JSON.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Row, Table};
use devcost_core::analytics::AnalyticsData;
use devcost_core::classifier::ClassificationScores;
use devcost_core::pricing::{CostBreakdown, MonthlyBudget, PricingModel};
use devcost_core::tokens::MethodComparison;
use devcost_core::tracker::{ReportData, TokenReport};
use serde::Serialize;

// ============================================================================
// Output
// ============================================================================

/// Rendering switches shared by all commands
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub no_color: bool,
}

impl Output {
    fn table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        if self.no_color {
            table.set_header(headers.to_vec());
        } else {
            table.set_header(
                headers
                    .iter()
                    .map(|h| Cell::new(h).fg(Color::Cyan))
                    .collect::<Vec<_>>(),
            );
        }
        table
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

// ============================================================================
// Date Filter
// ============================================================================

/// Lower bound on record timestamps
pub enum DateFilter {
    Days(u32),
    Months(u32),
    Years(u32),
    Since(DateTime<Utc>),
}

impl DateFilter {
    /// Parse from string: "7d", "30d", "3m", "1y", "YYYY-MM-DD"
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(stripped) = s.strip_suffix('d') {
            let days = stripped
                .parse::<u32>()
                .context("Invalid days format (expected: 7d)")?;
            return Ok(DateFilter::Days(days));
        }

        if let Some(stripped) = s.strip_suffix('m') {
            let months = stripped
                .parse::<u32>()
                .context("Invalid months format (expected: 3m)")?;
            return Ok(DateFilter::Months(months));
        }

        if let Some(stripped) = s.strip_suffix('y') {
            let years = stripped
                .parse::<u32>()
                .context("Invalid years format (expected: 1y)")?;
            return Ok(DateFilter::Years(years));
        }

        let date =
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").context("Invalid date format")?;
        let datetime = date.and_hms_opt(0, 0, 0).context("Invalid time")?.and_utc();
        Ok(DateFilter::Since(datetime))
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self {
            DateFilter::Days(d) => now - Duration::days(*d as i64),
            DateFilter::Months(m) => now - Duration::days((*m as i64) * 30),
            DateFilter::Years(y) => now - Duration::days((*y as i64) * 365),
            DateFilter::Since(dt) => *dt,
        }
    }
}

/// Parse a frequency window: "12h", "1d", "2w"
pub fn parse_window(s: &str) -> Result<Duration> {
    let Some(unit) = s.chars().last() else {
        bail!("Window must not be empty");
    };
    let number = &s[..s.len() - unit.len_utf8()];
    let count: i64 = number
        .parse()
        .with_context(|| format!("Invalid window '{s}' (expected e.g. 12h, 1d, 2w)"))?;
    if count <= 0 {
        bail!("Window must be positive, got '{s}'");
    }
    match unit {
        'h' => Ok(Duration::hours(count)),
        'd' => Ok(Duration::days(count)),
        'w' => Ok(Duration::weeks(count)),
        _ => bail!("Invalid window unit in '{s}' (expected h, d or w)"),
    }
}

// ============================================================================
// Formatters
// ============================================================================

pub fn format_token_report(report: &TokenReport, out: Output) -> Result<String> {
    if out.json {
        return to_json(report);
    }

    let mut lines = vec![
        format!("Tokens:           {}", report.tokens),
        format!("Method:           {}", report.method),
    ];
    if let Some(d) = &report.distribution {
        lines.push(format!(
            "  English:        {} chars → {} tokens",
            d.english_chars, d.english_tokens
        ));
        lines.push(format!(
            "  Chinese:        {} chars → {} tokens",
            d.chinese_chars, d.chinese_tokens
        ));
        lines.push(format!("  Estimated:      {} tokens", d.total_tokens));
    }
    Ok(lines.join("\n"))
}

pub fn format_comparison(comparison: &MethodComparison, out: Output) -> Result<String> {
    if out.json {
        return to_json(comparison);
    }

    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    let lines = [
        format!("Estimation:       {}", comparison.estimation),
        format!(
            "Tiktoken:         {}",
            or_dash(comparison.tiktoken.map(|t| t.to_string()))
        ),
        format!(
            "Difference:       {}",
            or_dash(comparison.difference.map(|d| d.to_string()))
        ),
        format!(
            "Accuracy:         {}",
            or_dash(comparison.accuracy.map(|a| format!("{a:.1}%")))
        ),
        format!("Recommendation:   {}", comparison.recommendation),
    ];
    Ok(lines.join("\n"))
}

pub fn format_cost(cost: &CostBreakdown, out: Output) -> Result<String> {
    if out.json {
        return to_json(cost);
    }

    let mut lines = vec![
        format!("Model:            {}", cost.model_name()),
        format!("Input:            {}", format_money(cost.input_cost(), cost.currency())),
        format!("Output:           {}", format_money(cost.output_cost(), cost.currency())),
    ];
    if let Some(cache) = cost.cache_costs() {
        lines.push(format!(
            "  Cache read:     {}",
            format_money(cache.read, cost.currency())
        ));
        lines.push(format!(
            "  Cache write:    {}",
            format_money(cache.write, cost.currency())
        ));
    }
    lines.push(format!(
        "Total:            {}",
        format_money(cost.total_cost(), cost.currency())
    ));
    Ok(lines.join("\n"))
}

/// One row per model, cheapest first
pub fn format_cost_comparison(costs: &[CostBreakdown], out: Output) -> Result<String> {
    if out.json {
        return to_json(costs);
    }

    let mut sorted: Vec<&CostBreakdown> = costs.iter().collect();
    sorted.sort_by(|a, b| a.total_cost().total_cmp(&b.total_cost()));

    let mut table = out.table(&["Model", "Input", "Output", "Total"]);
    for cost in sorted {
        table.add_row(Row::from(vec![
            Cell::new(cost.model_name()),
            money_cell(cost.input_cost(), cost.currency()),
            money_cell(cost.output_cost(), cost.currency()),
            money_cell(cost.total_cost(), cost.currency()),
        ]));
    }
    Ok(table.to_string())
}

pub fn format_budget(budget: &MonthlyBudget, out: Output) -> Result<String> {
    if out.json {
        return to_json(budget);
    }

    Ok([
        format!("Model:            {}", budget.model_name),
        format!("Daily tokens:     {}", format_tokens(budget.daily_tokens)),
        format!("Daily cost:       {}", format_money(budget.daily_cost, &budget.currency)),
        format!("Monthly cost:     {}", format_money(budget.monthly_cost, &budget.currency)),
    ]
    .join("\n"))
}

/// Price table, per million tokens; the default model is starred
pub fn format_models(models: &[PricingModel], default_model: &str, out: Output) -> Result<String> {
    if out.json {
        #[derive(Serialize)]
        struct Models<'a> {
            default_model: &'a str,
            models: &'a [PricingModel],
        }
        return to_json(&Models {
            default_model,
            models,
        });
    }

    let mut table = out.table(&["Model", "Input", "Output", "Cache read", "Cache write", "Batch"]);
    for model in models {
        let name = if model.name == default_model {
            format!("{} *", model.name)
        } else {
            model.name.clone()
        };
        table.add_row(Row::from(vec![
            Cell::new(name),
            price_cell(model.input_price),
            price_cell(model.output_price),
            price_cell(model.cache_read_price),
            price_cell(model.cache_write_price),
            Cell::new(format!("-{:.0}%", model.batch_discount * 100.0))
                .set_alignment(CellAlignment::Right),
        ]));
    }
    Ok(format!("{table}\nPrices per million tokens; * = default model"))
}

pub fn format_classification(scores: &ClassificationScores, out: Output) -> Result<String> {
    if out.json {
        return to_json(scores);
    }

    let mut table = out.table(&["Activity", "Score"]);
    for (activity_type, score) in &scores.scores {
        let marker = if *activity_type == scores.activity_type {
            " ←"
        } else {
            ""
        };
        table.add_row(Row::from(vec![
            Cell::new(format!("{}{marker}", activity_type.display_name())),
            Cell::new(score).set_alignment(CellAlignment::Right),
        ]));
    }
    Ok(format!(
        "Activity: {}\n{table}",
        scores.activity_type.display_name()
    ))
}

pub fn format_analytics(data: &AnalyticsData, out: Output) -> Result<String> {
    if out.json {
        return to_json(data);
    }
    if data.totals.total_count == 0 {
        return Ok("No activities found.".to_string());
    }

    let mut table = out.table(&["Activity", "Count", "Tokens", "Avg", "Tokens/min", "Per window"]);
    for (activity_type, pattern) in &data.patterns.by_type {
        let per_window = data
            .frequency
            .per_window
            .get(activity_type)
            .map(|f| format!("{f:.2}"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(Row::from(vec![
            Cell::new(activity_type.display_name()),
            Cell::new(pattern.count).set_alignment(CellAlignment::Right),
            Cell::new(format_tokens(pattern.total_tokens)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.0}", pattern.avg_tokens)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", pattern.tokens_per_minute))
                .set_alignment(CellAlignment::Right),
            Cell::new(per_window).set_alignment(CellAlignment::Right),
        ]));
    }

    let mut lines = vec![
        format!(
            "{} activities, {} tokens",
            data.totals.total_count,
            format_tokens(data.totals.total_tokens.total())
        ),
        table.to_string(),
    ];
    if let Some(hour) = data.frequency.peak_hour {
        lines.push(format!("Peak hour (UTC): {hour:02}:00"));
    }
    lines.extend(data.patterns.insights.iter().map(|i| format!("• {i}")));
    Ok(lines.join("\n"))
}

pub fn format_report(report: &ReportData, out: Output) -> Result<String> {
    if out.json {
        return to_json(report);
    }
    if report.record_count == 0 {
        return Ok("No records in the selected period.".to_string());
    }

    let period = match (report.period_start, report.period_end) {
        (Some(start), Some(end)) => format!(
            "{} → {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        ),
        _ => "-".to_string(),
    };

    let mut table = out.table(&["Activity", "Count", "Share", "Tokens", "Cost"]);
    for row in &report.rows {
        table.add_row(Row::from(vec![
            Cell::new(row.activity_type.display_name()),
            Cell::new(row.count).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}%", row.share)).set_alignment(CellAlignment::Right),
            Cell::new(format_tokens(row.tokens.total())).set_alignment(CellAlignment::Right),
            money_cell(row.cost, &report.currency),
        ]));
    }

    let mut lines = vec![
        format!("Period:           {period}"),
        format!("Records:          {}", report.record_count),
        format!(
            "Tokens:           {} (in {} / out {})",
            format_tokens(report.total_tokens.total()),
            format_tokens(report.total_tokens.input()),
            format_tokens(report.total_tokens.output())
        ),
        format!(
            "Cost:             {}",
            format_money(report.total_cost, &report.currency)
        ),
        table.to_string(),
    ];

    if !report.analytics.top_activities.is_empty() {
        lines.push("Top activities:".to_string());
        for activity in &report.analytics.top_activities {
            lines.push(format!(
                "  {:<10} {:>8}  {}",
                activity.activity_type.as_str(),
                format_tokens(activity.tokens.total()),
                truncate(&activity.content, 50)
            ));
        }
    }
    lines.extend(report.analytics.patterns.insights.iter().map(|i| format!("• {i}")));
    Ok(lines.join("\n"))
}

// ============================================================================
// Utilities
// ============================================================================

pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

pub fn format_money(amount: f64, currency: &str) -> String {
    if currency == "USD" {
        format!("${amount:.4}")
    } else {
        format!("{amount:.4} {currency}")
    }
}

fn money_cell(amount: f64, currency: &str) -> Cell {
    Cell::new(format_money(amount, currency)).set_alignment(CellAlignment::Right)
}

fn price_cell(price: f64) -> Cell {
    Cell::new(format!("{price:.2}")).set_alignment(CellAlignment::Right)
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    let char_count = first_line.chars().count();
    if char_count <= max {
        first_line.to_string()
    } else {
        first_line.chars().take(max - 1).collect::<String>() + "…"
    }
}

// ============================================================================
// Tests
// ============================================================================
