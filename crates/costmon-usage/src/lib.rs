//! # costmon-usage
//!
//! Token usage ingestion, pricing and analysis for costmon.
//!
//! This crate provides:
//! - [`LogScanner`] - Stream usage events out of JSON-lines session logs
//! - [`CostCalculator`] - Price events against a [`PricingTable`]
//! - [`UsageStore`] - SQLite storage keyed by a stable identity per event
//! - [`UsageQuery`] - Range aggregates for reports and budget checks
//! - [`UsageReport`] - Text, JSON and HTML reports
//! - [`budget`] - Classify spend against a ceiling
//!
//! ## Supported Log Shapes
//!
//! - Claude Code transcripts: `type: assistant` lines with `message.usage`
//! - OpenClaw agent sessions: `type: message` lines with `usage.cost.total`
//! - Headless run summaries: `type: result` with `total_cost_usd`
//! - OpenAI-compatible chat completions: `usage.prompt_tokens`
//!
//! ## Example
//!
//! ```no_run
//! use costmon_usage::{Ingestor, LogSource, PricingTable, UsageQuery, UsageStore, DateRange};
//!
//! fn main() -> costmon_usage::Result<()> {
//!     let store = UsageStore::open("/tmp/usage.db")?;
//!     let pricing = PricingTable::builtin();
//!
//!     let mut ingestor = Ingestor::new(&store, &pricing);
//!     ingestor.ingest_logs(LogSource::defaults()?, None)?;
//!     let summary = ingestor.finish()?;
//!     println!("{summary}");
//!
//!     let today = chrono::Local::now().date_naive();
//!     let query = UsageQuery::new(&store);
//!     println!("today: ${:.4}", query.total_cost(&DateRange::day(today))?);
//!     Ok(())
//! }
//! ```

pub mod budget;
pub mod calculator;
pub mod db;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod pricing;
pub mod providers;
pub mod query;
pub mod report;
pub mod window;

// Re-export main types
pub use budget::{BudgetCheck, BudgetPeriod, BudgetPolicy, BudgetStatus};
pub use calculator::{CostCalculator, CostQuote};
pub use db::UsageStore;
pub use error::{Result, UsageError};
pub use identity::IdentityKey;
pub use ingest::{FetchSummary, Ingestor, ManualEntry, record_manual};
pub use models::{
    CostBreakdown, CostSource, DailySummary, RawUsageEvent, RecordSource, SavingsSummary,
    TokenCounts, TokensSummary, UsageRecord,
};
pub use parser::{LogScanner, LogSource, ScanStats};
pub use pricing::{ModelPricing, PricingTable};
pub use providers::{
    AnthropicUsageClient, OpenAiUsageClient, ProviderUsage, UsageProvider, clients_from_config,
};
pub use query::UsageQuery;
pub use report::{OutputFormat, ReportPeriod, UsageReport, format_cost};
pub use window::{DateRange, TimeWindow, parse_date};
