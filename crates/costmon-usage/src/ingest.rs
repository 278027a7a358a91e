//! Ingestion pipeline: events in, priced rows out to the store.
//!
//! Session logs are streamed through [`LogScanner`], priced by a
//! [`CostCalculator`] and written in batches. Provider APIs go through the
//! same path. A failing file or API key is counted in the [`FetchSummary`]
//! and never aborts the run.

use std::fmt;

use chrono::{NaiveDate, Utc};
use costmon_core::log_usage_event;
use serde::Serialize;
use tracing::{info, warn};

use crate::calculator::CostCalculator;
use crate::db::UsageStore;
use crate::error::Result;
use crate::identity::IdentityKey;
use crate::models::{RawUsageEvent, RecordSource, TokenCounts, UsageRecord};
use crate::parser::{LogScanner, LogSource, ScanStats};
use crate::pricing::{PricingTable, infer_provider};
use crate::providers::UsageProvider;
use crate::window::DateRange;

/// Rows per write transaction.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Outcome of one `fetch` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    pub scan: ScanStats,
    /// Rows priced (and written, unless this was a dry run)
    pub records: usize,
    /// Rows actually written to the store
    pub records_written: usize,
    pub total_cost: f64,
    /// `provider/model` pairs without pricing
    pub unknown_models: Vec<String>,
    pub api_clients: usize,
    pub api_failures: usize,
    /// Provider rows dropped for an unreadable date
    pub api_malformed_rows: usize,
    pub dry_run: bool,
}

impl FetchSummary {
    /// True when anything was skipped or failed.
    pub fn has_problems(&self) -> bool {
        self.scan.files_failed > 0
            || self.scan.malformed_lines > 0
            || self.api_failures > 0
            || self.api_malformed_rows > 0
            || !self.unknown_models.is_empty()
    }
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would write" } else { "wrote" };
        writeln!(
            f,
            "{verb} {} records, ${:.4} total",
            if self.dry_run { self.records } else { self.records_written },
            self.total_cost
        )?;
        writeln!(
            f,
            "files: {} scanned, {} skipped, {} failed; lines: {} read, {} malformed, {} unrecognized",
            self.scan.files_scanned,
            self.scan.files_skipped,
            self.scan.files_failed,
            self.scan.lines_read,
            self.scan.malformed_lines,
            self.scan.unrecognized_records
        )?;
        if self.api_clients > 0 {
            writeln!(
                f,
                "api: {} keys queried, {} failed, {} malformed rows",
                self.api_clients, self.api_failures, self.api_malformed_rows
            )?;
        }
        if !self.unknown_models.is_empty() {
            writeln!(f, "no pricing for: {}", self.unknown_models.join(", "))?;
        }
        Ok(())
    }
}

/// Prices events and writes them to a store in batches.
pub struct Ingestor<'a> {
    store: &'a UsageStore,
    calculator: CostCalculator<'a>,
    batch: Vec<UsageRecord>,
    batch_size: usize,
    dry_run: bool,
    summary: FetchSummary,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a UsageStore, pricing: &'a PricingTable) -> Self {
        Self {
            store,
            calculator: CostCalculator::new(pricing),
            batch: Vec::with_capacity(DEFAULT_BATCH_SIZE),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            summary: FetchSummary::default(),
        }
    }

    /// Price everything but write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.summary.dry_run = dry_run;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Price one event and queue it for writing.
    pub fn push(&mut self, event: RawUsageEvent) -> Result<()> {
        let record = self.calculator.price(event);
        log_usage_event!(
            app = %record.app,
            provider = %record.provider,
            model = %record.model,
            date = %record.date,
            tokens = record.total_tokens(),
            cost_usd = record.cost
        );
        self.summary.records += 1;
        self.summary.total_cost += record.cost;
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = RawUsageEvent>) -> Result<()> {
        for event in events {
            self.push(event)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        if !self.dry_run {
            self.summary.records_written += self.store.upsert_batch(&self.batch)?;
        }
        self.batch.clear();
        Ok(())
    }

    /// Stream every event of `sources` within `range` into the store.
    pub fn ingest_logs(&mut self, sources: Vec<LogSource>, range: Option<DateRange>) -> Result<()> {
        let mut scanner = LogScanner::new(sources, range);
        for event in scanner.by_ref() {
            self.push(event)?;
        }
        self.summary.scan.merge(scanner.stats());
        Ok(())
    }

    /// Fetch `range` from every client. One failing client does not stop the others.
    pub async fn ingest_api(
        &mut self,
        clients: &[Box<dyn UsageProvider>],
        range: &DateRange,
    ) -> Result<()> {
        for client in clients {
            self.summary.api_clients += 1;
            match client.fetch(range).await {
                Ok(usage) => {
                    info!(
                        provider = client.provider(),
                        key = client.key_hash(),
                        rows = usage.events.len(),
                        malformed_rows = usage.malformed_rows,
                        "fetched provider usage"
                    );
                    self.summary.api_malformed_rows += usage.malformed_rows;
                    self.extend(usage.events)?;
                }
                Err(e) => {
                    self.summary.api_failures += 1;
                    warn!(
                        provider = client.provider(),
                        key = client.key_hash(),
                        error = %e,
                        "provider usage fetch failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Write what is left and return the summary.
    pub fn finish(mut self) -> Result<FetchSummary> {
        self.flush()?;
        self.summary.unknown_models = self.calculator.unknown_models();
        info!(
            records = self.summary.records,
            written = self.summary.records_written,
            cost_usd = self.summary.total_cost,
            dry_run = self.dry_run,
            "ingestion finished"
        );
        Ok(self.summary)
    }
}

/// A hand-entered usage row.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub date: NaiveDate,
    /// Inferred from the model when absent
    pub provider: Option<String>,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: Option<f64>,
    /// Entries with the same date, provider, model and label replace each other
    pub label: Option<String>,
}

impl ManualEntry {
    pub fn new(date: NaiveDate, model: impl Into<String>, tokens: TokenCounts) -> Self {
        Self {
            date,
            provider: None,
            model: model.into(),
            tokens,
            cost: None,
            label: None,
        }
    }

    pub fn into_event(self) -> RawUsageEvent {
        let provider = self
            .provider
            .clone()
            .unwrap_or_else(|| infer_provider(&self.model).to_string())
            .to_lowercase();
        // Unlabelled entries are always new rows
        let label = self
            .label
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let key = IdentityKey::manual(self.date, &provider, &self.model, &label);
        let mut event = RawUsageEvent::new(
            self.date,
            self.model,
            "manual",
            RecordSource::Manual,
            self.tokens,
            key,
        )
        .with_provider(provider);
        if let Some(cost) = self.cost {
            event = event.with_reported_cost(cost);
        }
        event
    }
}

/// Price and store one manual entry.
pub fn record_manual(
    store: &UsageStore,
    pricing: &PricingTable,
    entry: ManualEntry,
) -> Result<UsageRecord> {
    let mut calculator = CostCalculator::new(pricing);
    let record = calculator.price(entry.into_event());
    store.upsert(&record)?;
    info!(
        provider = %record.provider,
        model = %record.model,
        date = %record.date,
        cost_usd = record.cost,
        "recorded manual usage"
    );
    Ok(record)
}
