//! Turns raw usage events into priced [`UsageRecord`]s.

use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use crate::models::{CostSource, RawUsageEvent, TokenCounts, UsageRecord};
use crate::pricing::{EffectiveRates, MatchKind, PricingTable, infer_provider};

/// Cost figures for one set of token counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostQuote {
    /// Input + output + cache reads + cache writes
    pub cost: f64,
    /// What the cache reads would have cost at the input rate, minus what they cost
    pub savings: f64,
    /// Cache write premium above the input rate
    pub cache_write_cost: f64,
    pub rates: EffectiveRates,
    pub match_kind: MatchKind,
}

/// Prices events against a borrowed [`PricingTable`].
///
/// Unknown models price at zero and are flagged; each one is logged once per
/// calculator.
pub struct CostCalculator<'a> {
    pricing: &'a PricingTable,
    warned: HashSet<(String, String)>,
}

impl<'a> CostCalculator<'a> {
    pub fn new(pricing: &'a PricingTable) -> Self {
        Self {
            pricing,
            warned: HashSet::new(),
        }
    }

    /// Compute cost, savings and the write premium for `tokens`.
    ///
    /// Returns `None` when no pricing row matches.
    pub fn quote(&self, provider: &str, model: &str, tokens: &TokenCounts) -> Option<CostQuote> {
        let found = self.pricing.lookup(provider, model)?;
        let rates = found.pricing.rates_for(tokens.total_input());

        let base = EffectiveRates::price(tokens.input, rates.input)
            + EffectiveRates::price(tokens.output, rates.output);
        let reads = EffectiveRates::price(tokens.cache_read, rates.cache_read);
        let writes = EffectiveRates::price(tokens.cache_creation, rates.cache_write);

        let reads_at_input = EffectiveRates::price(tokens.cache_read, rates.input);
        let savings = (reads_at_input - reads).clamp(0.0, reads_at_input.max(0.0));
        let cache_write_cost =
            EffectiveRates::price(tokens.cache_creation, (rates.cache_write - rates.input).max(0.0));

        Some(CostQuote {
            cost: base + reads + writes,
            savings,
            cache_write_cost,
            rates,
            match_kind: found.kind,
        })
    }

    /// Price one event.
    ///
    /// A finite, non-negative reported cost wins over the computed one.
    pub fn price(&mut self, event: RawUsageEvent) -> UsageRecord {
        let provider = event
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| infer_provider(&event.model).to_string());

        let quote = self.quote(&provider, &event.model, &event.tokens);
        let reported = event
            .reported_cost
            .filter(|c| c.is_finite() && *c >= 0.0);

        let (cost, cost_source) = match (reported, &quote) {
            (Some(cost), _) => (cost, CostSource::Provider),
            (None, Some(q)) => (q.cost, CostSource::Computed),
            (None, None) => (0.0, CostSource::Computed),
        };
        let unknown_pricing = quote.is_none() && reported.is_none();

        if unknown_pricing && self.warned.insert((provider.clone(), event.model.clone())) {
            warn!(
                provider = %provider,
                model = %event.model,
                "no pricing for model, recording zero cost"
            );
        }

        let (savings, cache_write_cost) = quote
            .map(|q| (q.savings, q.cache_write_cost))
            .unwrap_or((0.0, 0.0));

        UsageRecord {
            identity_key: event.identity_key,
            date: event.date,
            provider,
            model: event.model,
            app: event.app,
            source: event.source,
            input_tokens: event.tokens.input,
            output_tokens: event.tokens.output,
            cache_read_tokens: event.tokens.cache_read,
            cache_creation_tokens: event.tokens.cache_creation,
            cost,
            savings,
            cache_write_cost,
            unknown_pricing,
            cost_source,
            recorded_at: Utc::now(),
        }
    }

    /// Models that failed to price so far, as `provider/model`.
    pub fn unknown_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .warned
            .iter()
            .map(|(provider, model)| format!("{provider}/{model}"))
            .collect();
        models.sort();
        models
    }
}
