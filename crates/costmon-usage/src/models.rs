//! Data models for usage tracking.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

/// Where a usage row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Parsed from a local session log
    Session,
    /// Entered by hand through `costmon record`
    Manual,
    /// Pulled from a provider usage API
    Api,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Manual => "manual",
            Self::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(Self::Session),
            "manual" => Some(Self::Manual),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which figure ended up in [`UsageRecord::cost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// Cost reported by the provider or client in the log
    Provider,
    /// Cost computed from the pricing table
    Computed,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Computed => "computed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Self::Provider),
            "computed" => Some(Self::Computed),
            _ => None,
        }
    }
}

/// Token counts of one usage event. Always non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: i64,
    pub output: i64,
    pub cache_read: i64,
    pub cache_creation: i64,
}

impl TokenCounts {
    /// Build counts, clamping negative values to zero.
    pub fn new(input: i64, output: i64, cache_read: i64, cache_creation: i64) -> Self {
        Self {
            input: input.max(0),
            output: output.max(0),
            cache_read: cache_read.max(0),
            cache_creation: cache_creation.max(0),
        }
    }

    /// Input side of the context window: fresh input plus both cache categories.
    pub fn total_input(&self) -> i64 {
        self.input + self.cache_read + self.cache_creation
    }

    pub fn total(&self) -> i64 {
        self.total_input() + self.output
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Position of a usage event in its log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
}

/// A usage event before pricing.
///
/// Produced by the log scanner, the provider API clients and manual entry;
/// consumed by [`crate::calculator::CostCalculator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawUsageEvent {
    pub date: NaiveDate,
    /// `None` when the record does not say; inferred from the model name
    pub provider: Option<String>,
    pub model: String,
    pub app: String,
    pub source: RecordSource,
    pub tokens: TokenCounts,
    /// Cost reported alongside the tokens, if any
    pub reported_cost: Option<f64>,
    pub identity_key: IdentityKey,
    pub provenance: Option<Provenance>,
}

impl RawUsageEvent {
    /// Create an event with required fields.
    pub fn new(
        date: NaiveDate,
        model: impl Into<String>,
        app: impl Into<String>,
        source: RecordSource,
        tokens: TokenCounts,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            date,
            provider: None,
            model: model.into(),
            app: app.into(),
            source,
            tokens,
            reported_cost: None,
            identity_key,
            provenance: None,
        }
    }

    /// Set the provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set a provider-reported cost.
    pub fn with_reported_cost(mut self, cost: f64) -> Self {
        self.reported_cost = Some(cost);
        self
    }

    /// Attach the file position the event was read from.
    pub fn with_provenance(mut self, path: impl Into<PathBuf>, line: usize) -> Self {
        self.provenance = Some(Provenance {
            path: path.into(),
            line,
        });
        self
    }
}

/// One stored row: a priced usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub identity_key: IdentityKey,
    pub date: NaiveDate,
    pub provider: String,
    pub model: String,
    pub app: String,
    pub source: RecordSource,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_creation_tokens: i64,
    /// Total cost in USD
    pub cost: f64,
    /// Discount realized by cache reads, in USD
    pub savings: f64,
    /// Premium paid for cache writes above the base input rate, in USD
    pub cache_write_cost: f64,
    pub unknown_pricing: bool,
    pub cost_source: CostSource,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn tokens(&self) -> TokenCounts {
        TokenCounts::new(
            self.input_tokens,
            self.output_tokens,
            self.cache_read_tokens,
            self.cache_creation_tokens,
        )
    }

    pub fn total_tokens(&self) -> i64 {
        self.tokens().total()
    }
}

/// Token totals over a date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensSummary {
    pub input: i64,
    pub output: i64,
    pub cache_read: i64,
    pub cache_creation: i64,
}

impl TokensSummary {
    pub fn total(&self) -> i64 {
        self.input + self.output + self.cache_read + self.cache_creation
    }
}

/// Cache economics over a date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub read_savings: f64,
    pub write_cost: f64,
}

impl SavingsSummary {
    /// Net effect of caching: read discount minus the write premium.
    pub fn total_savings(&self) -> f64 {
        self.read_savings - self.write_cost
    }
}

/// One day's totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub cost: f64,
    pub tokens: TokensSummary,
    pub record_count: i64,
}

impl DailySummary {
    /// A day with no usage.
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            cost: 0.0,
            tokens: TokensSummary::default(),
            record_count: 0,
        }
    }
}

/// Cost grouped by one dimension (model, provider, app or source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Group label (model name, provider, app or source)
    pub key: String,
    pub cost: f64,
    pub total_tokens: i64,
    pub record_count: i64,
}
