//! Pricing table: (provider, model) to per-million-token rates.
//!
//! The table is built once from the built-in rows plus an optional YAML
//! override file and is read-only afterwards. Lookups try, in order:
//!
//! 1. the exact model name,
//! 2. the normalized name (see [`normalize_model_name`]),
//! 3. the longest priced model that is a prefix of the normalized name.
//!
//! Lookups are scoped to the record's provider, except for `unknown`, which
//! searches every provider.
//!
//! Override file format:
//!
//! ```yaml
//! - provider: anthropic
//!   model: claude-sonnet-4-5
//!   input: 3.0
//!   output: 15.0
//!   cache_read: 0.30
//!   tier: { threshold_tokens: 200000, input: 6.0, output: 22.5 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, UsageError};

/// Provider name used when none can be determined.
pub const UNKNOWN_PROVIDER: &str = "unknown";

/// Default cache-read rate as a fraction of the input rate.
pub const DEFAULT_CACHE_READ_FACTOR: f64 = 0.10;

/// Anthropic bills 5-minute cache writes at 1.25x input.
const ANTHROPIC_CACHE_WRITE_FACTOR: f64 = 1.25;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Alternate rates applied when the context is larger than a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    /// Total input tokens above which the tier applies
    pub threshold_tokens: i64,
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: Option<f64>,
    #[serde(default)]
    pub cache_write: Option<f64>,
}

/// Pricing row for one model, rates in USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub provider: String,
    pub model: String,
    pub input: f64,
    pub output: f64,
    /// Explicit cache-read rate; otherwise `input * cache_read_factor`
    #[serde(default)]
    pub cache_read: Option<f64>,
    /// Explicit cache-write rate; otherwise `input * cache_write_factor`
    #[serde(default)]
    pub cache_write: Option<f64>,
    #[serde(default)]
    pub cache_read_factor: Option<f64>,
    #[serde(default)]
    pub cache_write_factor: Option<f64>,
    #[serde(default)]
    pub tier: Option<PricingTier>,
}

/// Per-token rates resolved for one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveRates {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl EffectiveRates {
    /// USD for `tokens` at a per-million `rate`.
    pub fn price(tokens: i64, rate: f64) -> f64 {
        tokens as f64 * rate / TOKENS_PER_MILLION
    }
}

impl ModelPricing {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, input: f64, output: f64) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input,
            output,
            cache_read: None,
            cache_write: None,
            cache_read_factor: None,
            cache_write_factor: None,
            tier: None,
        }
    }

    /// Set an explicit cache-read rate.
    pub fn with_cache_read(mut self, rate: f64) -> Self {
        self.cache_read = Some(rate);
        self
    }

    /// Set an explicit cache-write rate.
    pub fn with_cache_write(mut self, rate: f64) -> Self {
        self.cache_write = Some(rate);
        self
    }

    /// Add a long-context tier.
    pub fn with_tier(mut self, threshold_tokens: i64, input: f64, output: f64) -> Self {
        self.tier = Some(PricingTier {
            threshold_tokens,
            input,
            output,
            cache_read: None,
            cache_write: None,
        });
        self
    }

    fn read_factor(&self) -> f64 {
        self.cache_read_factor.unwrap_or(DEFAULT_CACHE_READ_FACTOR)
    }

    fn write_factor(&self) -> f64 {
        self.cache_write_factor.unwrap_or(if self.provider == "anthropic" {
            ANTHROPIC_CACHE_WRITE_FACTOR
        } else {
            1.0
        })
    }

    /// Rates for an event with `total_input` context tokens.
    pub fn rates_for(&self, total_input: i64) -> EffectiveRates {
        if let Some(tier) = &self.tier
            && total_input > tier.threshold_tokens
        {
            return EffectiveRates {
                input: tier.input,
                output: tier.output,
                cache_read: tier.cache_read.unwrap_or(tier.input * self.read_factor()),
                cache_write: tier.cache_write.unwrap_or(tier.input * self.write_factor()),
            };
        }
        EffectiveRates {
            input: self.input,
            output: self.output,
            cache_read: self.cache_read.unwrap_or(self.input * self.read_factor()),
            cache_write: self.cache_write.unwrap_or(self.input * self.write_factor()),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut rates = vec![("input", Some(self.input)), ("output", Some(self.output))];
        rates.push(("cache_read", self.cache_read));
        rates.push(("cache_write", self.cache_write));
        rates.push(("cache_read_factor", self.cache_read_factor));
        rates.push(("cache_write_factor", self.cache_write_factor));
        if let Some(tier) = &self.tier {
            rates.push(("tier.input", Some(tier.input)));
            rates.push(("tier.output", Some(tier.output)));
            rates.push(("tier.cache_read", tier.cache_read));
            rates.push(("tier.cache_write", tier.cache_write));
            if tier.threshold_tokens <= 0 {
                return Err(UsageError::Pricing(format!(
                    "{}/{}: tier.threshold_tokens must be positive",
                    self.provider, self.model
                )));
            }
        }
        for (name, value) in rates {
            if let Some(v) = value
                && !(v.is_finite() && v >= 0.0)
            {
                return Err(UsageError::Pricing(format!(
                    "{}/{}: {name} must be a non-negative number, got {v}",
                    self.provider, self.model
                )));
            }
        }
        if self.model.trim().is_empty() || self.provider.trim().is_empty() {
            return Err(UsageError::Pricing(
                "pricing rows need a provider and a model".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a lookup found its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Normalized,
    Prefix,
}

/// Result of a successful lookup.
#[derive(Debug, Clone, Copy)]
pub struct PricingMatch<'a> {
    pub pricing: &'a ModelPricing,
    pub kind: MatchKind,
}

/// Immutable pricing table.
#[derive(Debug, Clone)]
pub struct PricingTable {
    /// Keyed by (provider, model)
    entries: BTreeMap<(String, String), ModelPricing>,
}

impl PricingTable {
    /// Table holding only the built-in rows.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        for row in builtin_rows() {
            entries.insert((row.provider.clone(), row.model.clone()), row);
        }
        Self { entries }
    }

    /// Empty table, for tests and fully custom pricing.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Built-in rows merged with the override file, if one is given.
    pub fn load(override_file: Option<&Path>) -> Result<Self> {
        let mut table = Self::builtin();
        if let Some(path) = override_file {
            let yaml = std::fs::read_to_string(path)?;
            let count = table.apply_overrides(parse_overrides(&yaml)?);
            info!(path = %path.display(), rows = count, "loaded pricing overrides");
        }
        Ok(table)
    }

    /// Built-in rows merged with override rows given as YAML text.
    pub fn with_overrides_yaml(yaml: &str) -> Result<Self> {
        let mut table = Self::builtin();
        table.apply_overrides(parse_overrides(yaml)?);
        Ok(table)
    }

    fn apply_overrides(&mut self, rows: Vec<ModelPricing>) -> usize {
        let count = rows.len();
        for row in rows {
            debug!(provider = %row.provider, model = %row.model, "pricing override");
            self.insert(row);
        }
        count
    }

    /// Add or replace a row.
    pub fn insert(&mut self, mut row: ModelPricing) {
        row.provider = row.provider.to_lowercase();
        self.entries
            .insert((row.provider.clone(), row.model.clone()), row);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All rows, ordered by provider then model.
    pub fn iter(&self) -> impl Iterator<Item = &ModelPricing> {
        self.entries.values()
    }

    /// Rows eligible for a lookup under `provider`.
    fn candidates<'a, 'p>(&'a self, provider: &'p str) -> impl Iterator<Item = &'a ModelPricing> + use<'a, 'p> {
        let any = provider == UNKNOWN_PROVIDER;
        self.entries
            .values()
            .filter(move |row| any || row.provider == provider)
    }

    /// Find the pricing row for a model.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<PricingMatch<'_>> {
        let provider = provider.to_lowercase();

        if let Some(pricing) = self.candidates(&provider).find(|row| row.model == model) {
            return Some(PricingMatch {
                pricing,
                kind: MatchKind::Exact,
            });
        }

        let normalized = normalize_model_name(model);
        if let Some(pricing) = self
            .candidates(&provider)
            .find(|row| normalize_model_name(&row.model) == normalized)
        {
            return Some(PricingMatch {
                pricing,
                kind: MatchKind::Normalized,
            });
        }

        self.candidates(&provider)
            .filter(|row| is_prefix_on_boundary(&normalize_model_name(&row.model), &normalized))
            .max_by_key(|row| row.model.len())
            .map(|pricing| PricingMatch {
                pricing,
                kind: MatchKind::Prefix,
            })
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Parse and validate override rows.
pub fn parse_overrides(yaml: &str) -> Result<Vec<ModelPricing>> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<ModelPricing> = serde_yaml::from_str(yaml)?;
    let mut seen = std::collections::HashSet::new();
    for row in &rows {
        row.validate()?;
        if !seen.insert((row.provider.to_lowercase(), row.model.clone())) {
            return Err(UsageError::Pricing(format!(
                "duplicate pricing row for {}/{}",
                row.provider, row.model
            )));
        }
    }
    Ok(rows)
}

/// `prefix` matches `name` up to a `-` or `:` separator.
fn is_prefix_on_boundary(prefix: &str, name: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('-') || rest.starts_with(':'),
        None => false,
    }
}

/// Canonical form of a model name for pricing lookups.
///
/// Lower-cases, drops a `provider/` routing prefix and strips trailing
/// `-latest`, `@YYYYMMDD`, `-YYYYMMDD` and `-YYYY-MM-DD` suffixes.
pub fn normalize_model_name(model: &str) -> String {
    let mut name = model.trim().to_lowercase();
    if let Some((_, rest)) = name.rsplit_once('/') {
        name = rest.to_string();
    }
    loop {
        let before = name.len();
        if let Some(stripped) = name.strip_suffix("-latest") {
            name = stripped.to_string();
        }
        name = strip_date_suffix(&name).to_string();
        if name.len() == before {
            return name;
        }
    }
}

fn strip_date_suffix(name: &str) -> &str {
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    // -YYYY-MM-DD
    if name.len() > 11 && name.is_char_boundary(name.len() - 11) {
        let (head, tail) = name.split_at(name.len() - 11);
        let b = tail.as_bytes();
        if b[0] == b'-'
            && b[5] == b'-'
            && b[8] == b'-'
            && all_digits(&tail[1..5])
            && all_digits(&tail[6..8])
            && all_digits(&tail[9..11])
        {
            return head;
        }
    }
    // -YYYYMMDD or @YYYYMMDD
    if name.len() > 9 && name.is_char_boundary(name.len() - 9) {
        let (head, tail) = name.split_at(name.len() - 9);
        if (tail.starts_with('-') || tail.starts_with('@')) && all_digits(&tail[1..]) {
            return head;
        }
    }
    name
}

/// Guess the provider from a model name.
pub fn infer_provider(model: &str) -> &'static str {
    let name = normalize_model_name(model);
    let starts = |p: &str| name.starts_with(p);
    if starts("claude") {
        "anthropic"
    } else if starts("gpt") || starts("o1") || starts("o3") || starts("o4") || starts("chatgpt") {
        "openai"
    } else if starts("gemini") {
        "google"
    } else if starts("deepseek") {
        "deepseek"
    } else if starts("glm") {
        "zhipu"
    } else {
        UNKNOWN_PROVIDER
    }
}

/// Built-in list prices, USD per million tokens.
fn builtin_rows() -> Vec<ModelPricing> {
    vec![
        // Anthropic
        ModelPricing::new("anthropic", "claude-opus-4-5", 5.0, 25.0),
        ModelPricing::new("anthropic", "claude-opus-4-1", 15.0, 75.0),
        ModelPricing::new("anthropic", "claude-opus-4", 15.0, 75.0),
        ModelPricing::new("anthropic", "claude-sonnet-4-5", 3.0, 15.0).with_tier(200_000, 6.0, 22.5),
        ModelPricing::new("anthropic", "claude-sonnet-4", 3.0, 15.0).with_tier(200_000, 6.0, 22.5),
        ModelPricing::new("anthropic", "claude-haiku-4-5", 1.0, 5.0),
        ModelPricing::new("anthropic", "claude-3-7-sonnet", 3.0, 15.0),
        ModelPricing::new("anthropic", "claude-3-5-sonnet", 3.0, 15.0),
        ModelPricing::new("anthropic", "claude-3-5-haiku", 0.80, 4.0),
        ModelPricing::new("anthropic", "claude-3-opus", 15.0, 75.0),
        ModelPricing::new("anthropic", "claude-3-haiku", 0.25, 1.25),
        // OpenAI
        ModelPricing::new("openai", "gpt-5", 1.25, 10.0).with_cache_read(0.125),
        ModelPricing::new("openai", "gpt-5-mini", 0.25, 2.0).with_cache_read(0.025),
        ModelPricing::new("openai", "gpt-5-nano", 0.05, 0.40).with_cache_read(0.005),
        ModelPricing::new("openai", "gpt-4.1", 2.0, 8.0).with_cache_read(0.50),
        ModelPricing::new("openai", "gpt-4.1-mini", 0.40, 1.60).with_cache_read(0.10),
        ModelPricing::new("openai", "gpt-4.1-nano", 0.10, 0.40).with_cache_read(0.025),
        ModelPricing::new("openai", "gpt-4o", 2.50, 10.0).with_cache_read(1.25),
        ModelPricing::new("openai", "gpt-4o-mini", 0.15, 0.60).with_cache_read(0.075),
        ModelPricing::new("openai", "gpt-4-turbo", 10.0, 30.0),
        ModelPricing::new("openai", "gpt-4", 30.0, 60.0),
        ModelPricing::new("openai", "gpt-3.5-turbo", 0.50, 1.50),
        ModelPricing::new("openai", "o1", 15.0, 60.0).with_cache_read(7.50),
        ModelPricing::new("openai", "o1-mini", 1.10, 4.40).with_cache_read(0.55),
        ModelPricing::new("openai", "o3", 2.0, 8.0).with_cache_read(0.50),
        ModelPricing::new("openai", "o3-mini", 1.10, 4.40).with_cache_read(0.55),
        ModelPricing::new("openai", "o4-mini", 1.10, 4.40).with_cache_read(0.275),
        // Google
        ModelPricing::new("google", "gemini-2.5-pro", 1.25, 10.0)
            .with_cache_read(0.31)
            .with_tier(200_000, 2.50, 15.0),
        ModelPricing::new("google", "gemini-2.5-flash", 0.30, 2.50).with_cache_read(0.075),
        ModelPricing::new("google", "gemini-2.0-flash", 0.10, 0.40).with_cache_read(0.025),
        ModelPricing::new("google", "gemini-1.5-pro", 1.25, 5.0).with_tier(128_000, 2.50, 10.0),
        // DeepSeek
        ModelPricing::new("deepseek", "deepseek-chat", 0.27, 1.10).with_cache_read(0.07),
        ModelPricing::new("deepseek", "deepseek-reasoner", 0.55, 2.19).with_cache_read(0.14),
        // Zhipu
        ModelPricing::new("zhipu", "glm-4.7", 0.60, 2.20).with_cache_read(0.11),
        ModelPricing::new("zhipu", "glm-4.6", 0.60, 2.20).with_cache_read(0.11),
        ModelPricing::new("zhipu", "glm-4.5", 0.60, 2.20).with_cache_read(0.11),
        ModelPricing::new("zhipu", "glm-4.5-air", 0.20, 1.10).with_cache_read(0.03),
    ]
}
