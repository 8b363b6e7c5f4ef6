//! devcost - Token and cost accounting for AI-assisted development

mod cli;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cli::{DateFilter, Output};
use devcost_core::config::Settings;
use devcost_core::records::RecordBatch;
use devcost_core::tokens::CalculationMethod;
use devcost_core::tracker::{CostRequest, RecordRequest, ReportOptions, Tracker, DEFAULT_TOP_N};
use devcost_core::{AppError, LoadReport};
use devcost_types::UsageRecord;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "devcost",
    version,
    about = "Token and cost accounting for AI-assisted development",
    long_about = "Measures, classifies and prices the tokens spent in AI-assisted development\n\
                  sessions, and aggregates usage records into per-activity statistics.\n\
                  \n\
                  Examples:\n\
                    devcost calculate \"Hello 世界\" --distribution\n\
                    git diff | devcost calculate --method tiktoken\n\
                    devcost cost 120000 8000 --model claude-opus-4 --batch\n\
                    devcost cost 120000 8000 --all-models\n\
                    devcost classify \"why does this panic?\" --scores\n\
                    devcost analyze ~/.local/share/devcost/records --window 12h\n\
                    devcost report records/ --since 7d\n\
                  \n\
                  Environment Variables:\n\
                    DEVCOST_CONFIG                   # Config file path\n\
                    DEVCOST_PRICING                  # Price table path (overrides config)\n\
                    DEVCOST_NO_COLOR                 # Disable ANSI colors\n\
                    RUST_LOG                         # Log filter (default: warn)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/devcost/config.toml)
    #[arg(long, global = true, env = "DEVCOST_CONFIG")]
    config: Option<PathBuf>,

    /// Price table file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "DEVCOST_PRICING")]
    pricing: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable ANSI colors
    #[arg(long, global = true, env = "DEVCOST_NO_COLOR")]
    no_color: bool,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Count tokens in text (argument, --file or stdin)
    Calculate {
        text: Option<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// estimation, tiktoken or auto (default: from config)
        #[arg(long, short)]
        method: Option<CalculationMethod>,
        /// Show the English/Chinese breakdown
        #[arg(long)]
        distribution: bool,
    },
    /// Compare estimation against tiktoken
    Compare {
        text: Option<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// Price a token count
    Cost {
        input_tokens: i64,
        output_tokens: i64,
        /// Model name (default: the price table's default model)
        #[arg(long, short)]
        model: Option<String>,
        #[arg(long, default_value_t = 0)]
        cache_read: i64,
        #[arg(long, default_value_t = 0)]
        cache_write: i64,
        /// Apply the model's batch discount
        #[arg(long)]
        batch: bool,
        /// Price under every model instead
        #[arg(long, conflicts_with_all = ["model", "cache_read", "cache_write", "batch"])]
        all_models: bool,
    },
    /// Project a daily token volume over a month
    Budget {
        daily_tokens: i64,
        #[arg(long, short)]
        model: Option<String>,
    },
    /// List the price table
    Models,
    /// Classify text into an activity type
    Classify {
        text: Option<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Show per-category scores
        #[arg(long)]
        scores: bool,
    },
    /// Usage statistics over record files
    Analyze {
        /// JSONL record files or directories of them
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Frequency window: 12h, 1d, 2w
        #[arg(long, short, default_value = "1d")]
        window: String,
        /// Number of top activities
        #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_N)]
        top: usize,
    },
    /// Cost report over record files
    Report {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Date filter: 7d, 30d, 3m, 1y, YYYY-MM-DD
        #[arg(long, short = 'd')]
        since: Option<String>,
        /// Exclusive end date: YYYY-MM-DD
        #[arg(long)]
        until: Option<String>,
        #[arg(long, short, default_value = "1d")]
        window: String,
        #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_N)]
        top: usize,
    },
    /// Build a usage record for one interaction and print it as a JSONL line
    Record {
        #[arg(long, short)]
        session: String,
        /// Prompt text
        prompt: String,
        /// Response text (default: stdin when piped)
        response: Option<String>,
        #[arg(long, short)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let tracker = open_tracker(cli.config.as_deref(), cli.pricing.as_deref())?;
    let out = Output {
        json: cli.json,
        no_color: cli.no_color,
    };

    let rendered = match cli.command {
        Command::Calculate {
            text,
            file,
            method,
            distribution,
        } => {
            let report = match text {
                Some(text) => tracker.calculate(&text, method, distribution),
                None => tracker.calculate_reader(input_reader(file.as_deref())?, method, distribution),
            }
            .map_err(app_error)?;
            cli::format_token_report(&report, out)?
        }
        Command::Compare { text, file } => {
            let text = read_text(text, file.as_deref())?;
            let comparison = tracker.compare(&text).map_err(app_error)?;
            cli::format_comparison(&comparison, out)?
        }
        Command::Cost {
            input_tokens,
            output_tokens,
            model,
            cache_read,
            cache_write,
            batch,
            all_models,
        } => {
            if all_models {
                let costs = tracker
                    .pricing()
                    .compare_pricing_models(input_tokens, output_tokens)
                    .map_err(app_error)?;
                cli::format_cost_comparison(&costs, out)?
            } else {
                let mut request = CostRequest::new(input_tokens, output_tokens)
                    .with_cache(cache_read, cache_write)
                    .with_batch(batch);
                request.model = model;
                let cost = tracker.cost(&request).map_err(app_error)?;
                cli::format_cost(&cost, out)?
            }
        }
        Command::Budget {
            daily_tokens,
            model,
        } => {
            let budget = tracker
                .pricing()
                .estimate_monthly_budget(daily_tokens, model.as_deref())
                .map_err(app_error)?;
            cli::format_budget(&budget, out)?
        }
        Command::Models => {
            let pricing = tracker.pricing();
            cli::format_models(&pricing.models(), &pricing.default_model(), out)?
        }
        Command::Classify { text, file, scores } => {
            let text = read_text(text, file.as_deref())?;
            let result = tracker.classifier().classify_with_scores(&text);
            if scores || out.json {
                cli::format_classification(&result, out)?
            } else {
                result.activity_type.to_string()
            }
        }
        Command::Analyze { paths, window, top } => {
            let window = cli::parse_window(&window)?;
            let records = load_records(&tracker, &paths).await?;
            let activities: Vec<_> = records.iter().map(UsageRecord::to_activity).collect();
            let data = tracker.analyze_with(&activities, window, top);
            cli::format_analytics(&data, out)?
        }
        Command::Report {
            paths,
            since,
            until,
            window,
            top,
        } => {
            let options = ReportOptions {
                since: since
                    .as_deref()
                    .map(DateFilter::parse)
                    .transpose()?
                    .map(|f| f.cutoff()),
                until: until
                    .as_deref()
                    .map(DateFilter::parse)
                    .transpose()?
                    .map(|f| f.cutoff()),
                window: cli::parse_window(&window)?,
                top_n: top,
            };
            let records = load_records(&tracker, &paths).await?;
            let report = tracker.report(&records, &options).map_err(app_error)?;
            cli::format_report(&report, out)?
        }
        Command::Record {
            session,
            prompt,
            response,
            model,
        } => {
            let response = match response {
                Some(response) => response,
                None if !io::stdin().is_terminal() => read_text(None, None)?,
                None => String::new(),
            };
            let mut request = RecordRequest::new(session, prompt, response);
            request.model = model;
            let record = tracker.record(&request).await.map_err(app_error)?;
            devcost_core::records::to_json_line(&record).map_err(app_error)?
        }
    };

    println!("{rendered}");
    Ok(())
}

/// Logs go to stderr so JSON output stays clean
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "devcost=debug,devcost_core=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose)
        .init();
}

fn open_tracker(config: Option<&Path>, pricing: Option<&Path>) -> Result<Tracker> {
    let config_path = match config {
        Some(path) => Some(path.to_path_buf()),
        None => Settings::default_path(),
    };

    let (tracker, report) = match &config_path {
        Some(path) => Tracker::open(path).map_err(app_error)?,
        None => (Tracker::new(Settings::default()).map_err(app_error)?, None),
    };
    if let Some(report) = report {
        print_load_warnings(&report.report);
    }

    if let Some(path) = pricing {
        let report = tracker.load_pricing(path).map_err(app_error)?;
        print_load_warnings(&report.report);
        if !report.applied {
            bail!("No price table loaded from {}", path.display());
        }
    }

    debug!(default_model = %tracker.pricing().default_model(), "Tracker opened");
    Ok(tracker)
}

/// Attach the remediation hint to core errors
fn app_error(err: AppError) -> anyhow::Error {
    match err.remediation() {
        Some(hint) => anyhow::anyhow!("{err}\n  hint: {hint}"),
        None => anyhow::Error::new(err),
    }
}

fn input_reader(file: Option<&Path>) -> Result<Box<dyn Read>> {
    match file {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdin())),
    }
}

fn read_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut buffer = String::new();
    input_reader(file)?
        .read_to_string(&mut buffer)
        .context("Failed to read input")?;
    Ok(buffer)
}

/// Load every record file named by `paths` (directories contribute their
/// `*.jsonl` files, in name order)
async fn load_records(tracker: &Tracker, paths: &[PathBuf]) -> Result<Vec<UsageRecord>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    let mut records = Vec::new();
    let mut report = LoadReport::new();
    for file in &files {
        let RecordBatch {
            records: batch,
            report: batch_report,
        } = tracker.load_records(file).await.map_err(app_error)?;
        records.extend(batch);
        report.merge(batch_report);
    }

    debug!(files = files.len(), records = records.len(), "Loaded records");
    print_load_warnings(&report);
    Ok(records)
}

fn print_load_warnings(report: &LoadReport) {
    if !report.has_errors() {
        return;
    }
    let (warnings, errors, fatal) = report.error_count();
    warn!(warnings, errors, fatal, skipped = report.skipped, "Load problems");
    eprintln!("{} problem(s) while loading:", report.errors.len());
    for error in report.errors.iter().take(10) {
        eprintln!("  - {}: {}", error.source, error.message);
        if let Some(suggestion) = &error.suggestion {
            eprintln!("    {suggestion}");
        }
    }
    if report.errors.len() > 10 {
        eprintln!("  ... and {} more", report.errors.len() - 10);
    }
}
