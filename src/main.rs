//! costmon - personal LLM cost monitor
//!
//! Collects token usage from local session logs and provider usage APIs,
//! prices it, stores it in SQLite and reports on it.
//!
//! ## Usage
//!
//! ```bash
//! # Ingest today's session logs
//! costmon fetch
//!
//! # Backfill the last week, including provider APIs
//! costmon fetch --last-days 7 --api
//!
//! # Monthly report as HTML
//! costmon report --period month --format html --output report.html
//!
//! # Budget check for cron; exits 2 when a strict budget is exceeded
//! costmon alert --budget 100
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use chrono::{Local, NaiveDate};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use costmon_config::{BudgetMode, Config};
use costmon_core::{LogGuard, MonitorError, init_logging};
use costmon_usage::budget::{self, BudgetPeriod, BudgetPolicy};
use costmon_usage::{
    DateRange, Ingestor, LogSource, ManualEntry, OutputFormat, PricingTable, ReportPeriod,
    TimeWindow, TokenCounts, UsageError, UsageQuery, UsageReport, UsageStore, clients_from_config,
    format_cost, parse_date, record_manual,
};
use tracing::{error, info, warn};

/// Exit code for a strict budget that has been exceeded.
const EXIT_BUDGET_EXCEEDED: u8 = 2;

/// Personal LLM cost monitor
///
/// Ingests token usage, prices it, reports on it and guards a budget.
#[derive(Parser, Debug)]
#[command(name = "costmon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ./config/config.yaml, then ~/.llm-cost-monitor/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for log files (defaults to ~/.llm-cost-monitor/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest usage from session logs and, optionally, provider APIs
    Fetch(FetchArgs),
    /// Record usage by hand
    Record(RecordArgs),
    /// Print a cost report
    Report(ReportArgs),
    /// Check spend against the budget
    Alert(AlertArgs),
    /// Show the pricing the calculator would use
    Pricing(PricingArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("window").args(["today", "yesterday", "last_days", "from", "all"])))]
struct FetchArgs {
    /// Only today (default)
    #[arg(long)]
    today: bool,

    /// Only yesterday
    #[arg(long)]
    yesterday: bool,

    /// The last N days, including today
    #[arg(long, value_name = "N")]
    last_days: Option<u32>,

    /// Start date (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// End date (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Every log line regardless of date
    #[arg(long)]
    all: bool,

    /// Only scan sources with this app name (repeatable)
    #[arg(long = "source", value_name = "NAME")]
    sources: Vec<String>,

    /// Also pull usage from the configured provider APIs
    #[arg(long)]
    api: bool,

    /// Price and count, but write nothing
    #[arg(long)]
    dry_run: bool,
}

impl FetchArgs {
    fn window(&self) -> anyhow::Result<TimeWindow> {
        Ok(if self.yesterday {
            TimeWindow::Yesterday
        } else if let Some(n) = self.last_days {
            TimeWindow::LastDays(n)
        } else if let (Some(from), Some(to)) = (&self.from, &self.to) {
            TimeWindow::Range(DateRange::parse(from, to)?)
        } else if self.all {
            TimeWindow::All
        } else {
            TimeWindow::Today
        })
    }
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Provider (inferred from the model when omitted)
    #[arg(long)]
    provider: Option<String>,

    /// Model name
    #[arg(long)]
    model: String,

    /// Usage date (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    date: Option<String>,

    #[arg(long, default_value_t = 0)]
    input: i64,

    #[arg(long, default_value_t = 0)]
    output: i64,

    #[arg(long, default_value_t = 0)]
    cache_read: i64,

    #[arg(long, default_value_t = 0)]
    cache_write: i64,

    /// Known cost in USD; replaces the computed one
    #[arg(long)]
    cost: Option<f64>,

    /// Entries sharing date, provider, model and label replace each other
    #[arg(long)]
    label: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PeriodArg {
    Today,
    Yesterday,
    Week,
    Month,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Text,
    Json,
    Html,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Named period
    #[arg(long, value_enum, default_value = "today", conflicts_with = "from")]
    period: PeriodArg,

    /// Custom start date (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Custom end date (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: FormatArg,

    /// Write the report to a file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Strict,
    /// Alias of strict
    Exit,
    Warn,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BudgetPeriodArg {
    Today,
    Week,
    Month,
}

#[derive(Args, Debug)]
struct AlertArgs {
    /// Ceiling in USD (defaults to budget.monthly_limit)
    #[arg(long)]
    budget: Option<f64>,

    /// strict: exit 2 when exceeded; warn: only log
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    #[arg(long, value_enum, default_value = "month")]
    period: BudgetPeriodArg,
}

#[derive(Args, Debug)]
struct PricingArgs {
    /// Resolve a single model
    #[arg(long)]
    model: Option<String>,

    /// Provider for the lookup, or filter for the listing
    #[arg(long)]
    provider: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("costmon failed: {e:#}");
            eprintln!("Error: {e:#}");
            if let Some(hint) = guidance(&e) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> costmon_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

fn guidance(e: &anyhow::Error) -> Option<&'static str> {
    e.chain().find_map(|cause| {
        if let Some(err) = cause.downcast_ref::<UsageError>() {
            err.guidance()
        } else {
            cause.downcast_ref::<MonitorError>().and_then(MonitorError::guidance)
        }
    })
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Fetch(args) => fetch(&config, &args),
        Command::Record(args) => record(&config, args),
        Command::Report(args) => report(&config, &args),
        Command::Alert(args) => alert(&config, &args),
        Command::Pricing(args) => pricing(&config, &args),
    }
}

fn open_store(config: &Config) -> anyhow::Result<UsageStore> {
    let path = config.database_path()?;
    UsageStore::open(&path).with_context(|| format!("opening usage database {}", path.display()))
}

fn load_pricing(config: &Config) -> anyhow::Result<PricingTable> {
    let file = config.pricing_file()?;
    PricingTable::load(file.as_deref()).with_context(|| match &file {
        Some(path) => format!("loading pricing overrides from {}", path.display()),
        None => "loading pricing table".to_string(),
    })
}

fn log_sources(config: &Config, only: &[String]) -> anyhow::Result<Vec<LogSource>> {
    let mut sources = Vec::new();
    if config.include_default_sources {
        sources.extend(LogSource::defaults()?);
    }
    for source in &config.sources {
        sources.push(LogSource::from_config(source)?);
    }
    if !only.is_empty() {
        sources.retain(|s| only.iter().any(|name| name == &s.app));
        if sources.is_empty() {
            bail!("no log source named {}", only.join(", "));
        }
    }
    Ok(sources)
}

fn fetch(config: &Config, args: &FetchArgs) -> anyhow::Result<ExitCode> {
    let window = args.window()?;
    let range = window.resolve(today());

    // Everything that can reject the request runs before the store is touched
    let api = if args.api {
        let Some(range) = range else {
            bail!("--api needs a bounded window; use --last-days or --from/--to instead of --all");
        };
        Some((clients_from_config(&config.providers)?, range))
    } else {
        None
    };
    let sources = log_sources(config, &args.sources)?;
    let pricing = load_pricing(config)?;

    let store = open_store(config)?;
    info!(%window, dry_run = args.dry_run, "fetching usage");

    let mut ingestor = Ingestor::new(&store, &pricing).dry_run(args.dry_run);
    ingestor.ingest_logs(sources, range)?;

    if let Some((clients, range)) = api {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("starting async runtime")?;
        runtime.block_on(ingestor.ingest_api(&clients, &range))?;
    }

    let summary = ingestor.finish()?;
    print!("{summary}");
    if summary.has_problems() {
        warn!(
            failed_files = summary.scan.files_failed,
            malformed_lines = summary.scan.malformed_lines,
            api_failures = summary.api_failures,
            api_malformed_rows = summary.api_malformed_rows,
            unknown_models = summary.unknown_models.len(),
            "fetch finished with skipped items"
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn record(config: &Config, args: RecordArgs) -> anyhow::Result<ExitCode> {
    let date = match &args.date {
        Some(date) => parse_date(date)?,
        None => today(),
    };
    let store = open_store(config)?;
    let pricing = load_pricing(config)?;

    let mut entry = ManualEntry::new(
        date,
        args.model,
        TokenCounts::new(args.input, args.output, args.cache_read, args.cache_write),
    );
    entry.provider = args.provider;
    entry.cost = args.cost;
    entry.label = args.label;

    let record = record_manual(&store, &pricing, entry)?;
    println!(
        "Recorded {}/{} on {}: {} ({} tokens){}",
        record.provider,
        record.model,
        record.date,
        format_cost(record.cost),
        record.total_tokens(),
        if record.unknown_pricing { " - no pricing for this model" } else { "" }
    );
    Ok(ExitCode::SUCCESS)
}

fn report(config: &Config, args: &ReportArgs) -> anyhow::Result<ExitCode> {
    let period = match (&args.from, &args.to) {
        (Some(from), Some(to)) => ReportPeriod::Custom(DateRange::parse(from, to)?),
        _ => match args.period {
            PeriodArg::Today => ReportPeriod::Today,
            PeriodArg::Yesterday => ReportPeriod::Yesterday,
            PeriodArg::Week => ReportPeriod::Week,
            PeriodArg::Month => ReportPeriod::Month,
        },
    };
    let format = match args.format {
        FormatArg::Text => OutputFormat::Text,
        FormatArg::Json => OutputFormat::Json,
        FormatArg::Html => OutputFormat::Html,
    };
    let policy = match config.budget.monthly_limit {
        Some(_) => Some(BudgetPolicy::from_config(&config.budget, None, None)?),
        None => None,
    };

    let store = open_store(config)?;
    let query = UsageQuery::new(&store);
    let rendered = UsageReport::build(&query, period, today(), policy.as_ref())?.render(format)?;

    match &args.output {
        Some(path) => {
            write_report(path, &rendered)?;
            println!("Report written to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn write_report(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

fn alert(config: &Config, args: &AlertArgs) -> anyhow::Result<ExitCode> {
    let mode = args.mode.map(|m| match m {
        ModeArg::Strict | ModeArg::Exit => BudgetMode::Strict,
        ModeArg::Warn => BudgetMode::Warn,
    });
    let period = match args.period {
        BudgetPeriodArg::Today => BudgetPeriod::Today,
        BudgetPeriodArg::Week => BudgetPeriod::Week,
        BudgetPeriodArg::Month => BudgetPeriod::Month,
    };
    let policy = BudgetPolicy::from_config(&config.budget, args.budget, mode)?;

    let store = open_store(config)?;
    let query = UsageQuery::new(&store);
    let result = budget::check(&query, &policy, period, today())?;

    println!("{}", result.summary_line());
    if result.needs_alert() {
        println!();
        print!("{}", result.alert_message());
        if !config.budget.notify_channels.is_empty() {
            info!(
                channels = %config.budget.notify_channels.join(","),
                "alert ready for notification delivery"
            );
        }
    }

    if result.is_fatal() {
        eprintln!("Budget exceeded, exiting with code {EXIT_BUDGET_EXCEEDED}");
        return Ok(ExitCode::from(EXIT_BUDGET_EXCEEDED));
    }
    Ok(ExitCode::SUCCESS)
}

fn pricing(config: &Config, args: &PricingArgs) -> anyhow::Result<ExitCode> {
    let table = load_pricing(config)?;

    if let Some(model) = &args.model {
        let provider = args
            .provider
            .clone()
            .unwrap_or_else(|| costmon_usage::pricing::infer_provider(model).to_string());
        let Some(found) = table.lookup(&provider, model) else {
            println!("{provider}/{model}: no pricing (usage would be recorded at $0)");
            return Ok(ExitCode::SUCCESS);
        };
        let row = found.pricing;
        let rates = row.rates_for(0);
        println!("{provider}/{model} -> {}/{} ({:?} match)", row.provider, row.model, found.kind);
        println!(
            "  per 1M tokens: input ${:.4}, output ${:.4}, cache read ${:.4}, cache write ${:.4}",
            rates.input, rates.output, rates.cache_read, rates.cache_write
        );
        if let Some(tier) = &row.tier {
            println!(
                "  above {} input tokens: input ${:.4}, output ${:.4}",
                tier.threshold_tokens, tier.input, tier.output
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let filter = args.provider.as_deref().map(str::to_lowercase);
    for row in table
        .iter()
        .filter(|row| filter.as_deref().is_none_or(|p| row.provider == p))
    {
        println!(
            "{:<10} {:<28} in ${:>7.3}  out ${:>7.3}",
            row.provider, row.model, row.input, row.output
        );
    }
    Ok(ExitCode::SUCCESS)
}
