//! Budget guard.
//!
//! Classifies the spend of a period against a ceiling. Exit codes are the
//! binary's business; this module only says `Ok`, `Warning` or `Exceeded`.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use costmon_config::{BudgetConfig, BudgetMode};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, UsageError};
use crate::query::UsageQuery;
use crate::report::format_cost;
use crate::window::DateRange;

/// Span of spending a budget covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Today,
    /// Seven days ending today
    Week,
    /// First of the calendar month through today
    #[default]
    Month,
}

impl BudgetPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" | "day" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    pub fn range(&self, today: NaiveDate) -> DateRange {
        match self {
            Self::Today => DateRange::day(today),
            Self::Week => DateRange::last_days(today, 7),
            Self::Month => {
                let first = today.with_day(1).unwrap_or(today);
                DateRange::last_days(today, (today - first).num_days() as u32 + 1)
            }
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated spending ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetPolicy {
    ceiling: f64,
    alert_threshold: f64,
    mode: BudgetMode,
}

impl BudgetPolicy {
    /// Ceiling must be positive; threshold must lie in (0, 1].
    pub fn new(ceiling: f64, alert_threshold: f64, mode: BudgetMode) -> Result<Self> {
        if !ceiling.is_finite() || ceiling <= 0.0 {
            return Err(UsageError::Config(format!(
                "budget ceiling must be positive, got {ceiling}"
            )));
        }
        if !(alert_threshold > 0.0 && alert_threshold <= 1.0) {
            return Err(UsageError::Config(format!(
                "alert threshold must be in (0, 1], got {alert_threshold}"
            )));
        }
        Ok(Self {
            ceiling,
            alert_threshold,
            mode,
        })
    }

    /// Build from config, with optional command line overrides.
    pub fn from_config(
        config: &BudgetConfig,
        ceiling: Option<f64>,
        mode: Option<BudgetMode>,
    ) -> Result<Self> {
        let ceiling = ceiling.or(config.monthly_limit).ok_or_else(|| {
            UsageError::ConfigMissing(
                "no budget ceiling: pass --budget or set budget.monthly_limit".to_string(),
            )
        })?;
        Self::new(ceiling, config.alert_threshold, mode.unwrap_or(config.mode))
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn alert_threshold(&self) -> f64 {
        self.alert_threshold
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    /// Classify a spend against this policy.
    pub fn classify(&self, spent: f64) -> BudgetStatus {
        if spent >= self.ceiling {
            BudgetStatus::Exceeded
        } else if spent >= self.ceiling * self.alert_threshold {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

impl BudgetStatus {
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Ok => "✅",
            Self::Warning => "⚠️",
            Self::Exceeded => "🔴",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Exceeded => "EXCEEDED",
        }
    }
}

/// Result of one budget check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetCheck {
    pub status: BudgetStatus,
    pub spent: f64,
    pub ceiling: f64,
    /// Spend as a percentage of the ceiling
    pub percentage: f64,
    pub mode: BudgetMode,
    pub period: BudgetPeriod,
    pub range: DateRange,
}

impl BudgetCheck {
    /// Only an exceeded budget in strict mode should fail the caller.
    pub fn is_fatal(&self) -> bool {
        self.status == BudgetStatus::Exceeded && self.mode == BudgetMode::Strict
    }

    /// Whether an external notifier should be triggered.
    pub fn needs_alert(&self) -> bool {
        self.status != BudgetStatus::Ok
    }

    /// One-line status for terminals.
    pub fn summary_line(&self) -> String {
        format!(
            "{} Budget {}: {} / {} ({:.1}%)",
            self.status.indicator(),
            self.status.label(),
            format_cost(self.spent),
            format_cost(self.ceiling),
            self.percentage
        )
    }

    /// Multi-line message for notification delivery.
    pub fn alert_message(&self) -> String {
        format!(
            "💰 LLM Cost Alert\n\n\
             {} {} Budget Alert!\n\n\
             Current spending: {}\n\
             Budget limit: {}\n\
             Usage: {:.1}%\n\n\
             Period: {}\n",
            self.status.indicator(),
            self.status.label(),
            format_cost(self.spent),
            format_cost(self.ceiling),
            self.percentage,
            self.range
        )
    }
}

/// Check the spend of `period` (ending `today`) against `policy`.
pub fn check(
    query: &UsageQuery<'_>,
    policy: &BudgetPolicy,
    period: BudgetPeriod,
    today: NaiveDate,
) -> Result<BudgetCheck> {
    let range = period.range(today);
    let spent = query.total_cost(&range)?;
    let status = policy.classify(spent);
    let result = BudgetCheck {
        status,
        spent,
        ceiling: policy.ceiling,
        percentage: spent / policy.ceiling * 100.0,
        mode: policy.mode,
        period,
        range,
    };

    match status {
        BudgetStatus::Ok => {
            info!(spent, ceiling = policy.ceiling, %period, "budget ok");
        }
        BudgetStatus::Warning => {
            warn!(spent, ceiling = policy.ceiling, %period, "budget threshold reached");
        }
        BudgetStatus::Exceeded => {
            warn!(
                spent,
                ceiling = policy.ceiling,
                %period,
                mode = policy.mode.as_str(),
                "budget exceeded"
            );
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UsageStore;
    use crate::identity::IdentityKey;
    use crate::models::{CostSource, RecordSource, UsageRecord};
    use chrono::Utc;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn store_with(costs: &[(&str, f64)]) -> UsageStore {
        let store = UsageStore::open_in_memory().unwrap();
        for (i, (date, cost)) in costs.iter().enumerate() {
            store
                .upsert(&UsageRecord {
                    identity_key: IdentityKey::from_raw(format!("k{i}")),
                    date: d(date),
                    provider: "anthropic".into(),
                    model: "claude-sonnet-4-5".into(),
                    app: "claude-code".into(),
                    source: RecordSource::Session,
                    input_tokens: 1,
                    output_tokens: 1,
                    cache_read_tokens: 0,
                    cache_creation_tokens: 0,
                    cost: *cost,
                    savings: 0.0,
                    cache_write_cost: 0.0,
                    unknown_pricing: false,
                    cost_source: CostSource::Computed,
                    recorded_at: Utc::now(),
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_policy_validation() {
        assert!(BudgetPolicy::new(0.0, 0.8, BudgetMode::Strict).is_err());
        assert!(BudgetPolicy::new(-5.0, 0.8, BudgetMode::Strict).is_err());
        assert!(BudgetPolicy::new(100.0, 0.0, BudgetMode::Strict).is_err());
        assert!(BudgetPolicy::new(100.0, 1.5, BudgetMode::Strict).is_err());
        assert!(BudgetPolicy::new(100.0, 1.0, BudgetMode::Strict).is_ok());

        let missing = BudgetPolicy::from_config(&BudgetConfig::default(), None, None);
        assert!(matches!(missing, Err(UsageError::ConfigMissing(_))));
    }

    #[test]
    fn test_classification() {
        let policy = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();
        assert_eq!(policy.classify(79.99), BudgetStatus::Ok);
        assert_eq!(policy.classify(85.0), BudgetStatus::Warning);
        assert_eq!(policy.classify(100.0), BudgetStatus::Exceeded);
    }

    #[test]
    fn test_month_is_calendar_month_to_date() {
        let range = BudgetPeriod::Month.range(d("2026-03-15"));
        assert_eq!(range.start(), d("2026-03-01"));
        assert_eq!(range.end(), d("2026-03-15"));

        let first = BudgetPeriod::Month.range(d("2026-03-01"));
        assert_eq!(first.num_days(), 1);
        assert_eq!(BudgetPeriod::Week.range(d("2026-03-15")).start(), d("2026-03-09"));
    }

    #[test]
    fn test_warning_is_never_fatal() {
        let store = store_with(&[("2026-03-02", 50.0), ("2026-03-10", 35.0), ("2026-02-27", 500.0)]);
        let query = UsageQuery::new(&store);
        let policy = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();

        let result = check(&query, &policy, BudgetPeriod::Month, d("2026-03-15")).unwrap();
        assert_eq!(result.status, BudgetStatus::Warning);
        assert!((result.percentage - 85.0).abs() < 1e-9);
        assert!(!result.is_fatal());
        assert!(result.needs_alert());
        assert!(result.alert_message().contains("Current spending: $85.00"));
    }

    #[test]
    fn test_exceeded_is_fatal_only_in_strict_mode() {
        let store = store_with(&[("2026-03-02", 100.0)]);
        let query = UsageQuery::new(&store);

        let strict = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();
        let result = check(&query, &strict, BudgetPeriod::Month, d("2026-03-15")).unwrap();
        assert_eq!(result.status, BudgetStatus::Exceeded);
        assert!(result.is_fatal());

        let warn_only = BudgetPolicy::new(100.0, 0.8, BudgetMode::Warn).unwrap();
        let result = check(&query, &warn_only, BudgetPeriod::Month, d("2026-03-15")).unwrap();
        assert_eq!(result.status, BudgetStatus::Exceeded);
        assert!(!result.is_fatal());
    }
}
