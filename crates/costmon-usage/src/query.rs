//! Aggregate queries over the usage store.
//!
//! Every query takes an inclusive [`DateRange`]. Ranges without data yield
//! zeroed totals, zeroed days and empty breakdowns.

use std::collections::BTreeMap;

use rusqlite::{Connection, params};

use crate::db::{UsageStore, date_column};
use crate::error::{Result, UsageError};
use crate::models::{CostBreakdown, DailySummary, SavingsSummary, TokensSummary};
use crate::window::DateRange;

/// Grouping column for [`UsageQuery::breakdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Model,
    Provider,
    App,
    Source,
}

impl Dimension {
    fn column(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Provider => "provider",
            Self::App => "app",
            Self::Source => "source",
        }
    }
}

/// Query interface for usage analysis.
pub struct UsageQuery<'a> {
    store: &'a UsageStore,
}

impl<'a> UsageQuery<'a> {
    pub fn new(store: &'a UsageStore) -> Self {
        Self { store }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.store.connection();
        let conn = conn
            .lock()
            .map_err(|e| UsageError::Query(format!("failed to acquire lock: {e}")))?;
        Ok(f(&conn)?)
    }

    /// Sum of `cost` over the range.
    pub fn total_cost(&self, range: &DateRange) -> Result<f64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0)
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2",
                params![range.start().to_string(), range.end().to_string()],
                |row| row.get(0),
            )
        })
    }

    /// Token totals over the range.
    pub fn tokens_summary(&self, range: &DateRange) -> Result<TokensSummary> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0),
                        COALESCE(SUM(cache_read_tokens), 0),
                        COALESCE(SUM(cache_creation_tokens), 0)
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2",
                params![range.start().to_string(), range.end().to_string()],
                |row| {
                    Ok(TokensSummary {
                        input: row.get(0)?,
                        output: row.get(1)?,
                        cache_read: row.get(2)?,
                        cache_creation: row.get(3)?,
                    })
                },
            )
        })
    }

    /// Cache read savings and write premium over the range.
    pub fn savings_summary(&self, range: &DateRange) -> Result<SavingsSummary> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(savings), 0.0), COALESCE(SUM(cache_write_cost), 0.0)
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2",
                params![range.start().to_string(), range.end().to_string()],
                |row| {
                    Ok(SavingsSummary {
                        read_savings: row.get(0)?,
                        write_cost: row.get(1)?,
                    })
                },
            )
        })
    }

    /// One row per day of `range`, ascending. Days without usage are zeroed.
    pub fn daily_summary(&self, range: &DateRange) -> Result<Vec<DailySummary>> {
        let mut by_date: BTreeMap<_, _> = self
            .daily_rows(range)?
            .into_iter()
            .map(|day| (day.date, day))
            .collect();
        Ok(range
            .iter_days()
            .map(|date| by_date.remove(&date).unwrap_or_else(|| DailySummary::zero(date)))
            .collect())
    }

    fn daily_rows(&self, range: &DateRange) -> Result<Vec<DailySummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date,
                        SUM(cost),
                        SUM(input_tokens),
                        SUM(output_tokens),
                        SUM(cache_read_tokens),
                        SUM(cache_creation_tokens),
                        COUNT(*)
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2
                 GROUP BY date
                 ORDER BY date",
            )?;
            let rows = stmt.query_map(
                params![range.start().to_string(), range.end().to_string()],
                |row| {
                    Ok(DailySummary {
                        date: date_column(row, 0)?,
                        cost: row.get(1)?,
                        tokens: TokensSummary {
                            input: row.get(2)?,
                            output: row.get(3)?,
                            cache_read: row.get(4)?,
                            cache_creation: row.get(5)?,
                        },
                        record_count: row.get(6)?,
                    })
                },
            )?;
            rows.collect()
        })
    }

    /// Cost grouped by `dimension`, most expensive first.
    pub fn breakdown(&self, range: &DateRange, dimension: Dimension) -> Result<Vec<CostBreakdown>> {
        let column = dimension.column();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {column},
                        SUM(cost),
                        SUM(input_tokens + output_tokens + cache_read_tokens + cache_creation_tokens),
                        COUNT(*)
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2
                 GROUP BY {column}
                 ORDER BY SUM(cost) DESC, {column} ASC"
            ))?;
            let rows = stmt.query_map(
                params![range.start().to_string(), range.end().to_string()],
                |row| {
                    Ok(CostBreakdown {
                        key: row.get(0)?,
                        cost: row.get(1)?,
                        total_tokens: row.get(2)?,
                        record_count: row.get(3)?,
                    })
                },
            )?;
            rows.collect()
        })
    }

    pub fn cost_by_model(&self, range: &DateRange) -> Result<Vec<CostBreakdown>> {
        self.breakdown(range, Dimension::Model)
    }

    pub fn cost_by_provider(&self, range: &DateRange) -> Result<Vec<CostBreakdown>> {
        self.breakdown(range, Dimension::Provider)
    }

    pub fn cost_by_app(&self, range: &DateRange) -> Result<Vec<CostBreakdown>> {
        self.breakdown(range, Dimension::App)
    }

    pub fn cost_by_source(&self, range: &DateRange) -> Result<Vec<CostBreakdown>> {
        self.breakdown(range, Dimension::Source)
    }

    /// Models stored without a pricing match, sorted.
    pub fn unknown_pricing_models(&self, range: &DateRange) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT model
                 FROM usage_records
                 WHERE date BETWEEN ?1 AND ?2 AND unknown_pricing = 1
                 ORDER BY model",
            )?;
            let rows = stmt.query_map(
                params![range.start().to_string(), range.end().to_string()],
                |row| row.get(0),
            )?;
            rows.collect()
        })
    }

    /// Number of rows in the range.
    pub fn record_count(&self, range: &DateRange) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM usage_records WHERE date BETWEEN ?1 AND ?2",
                params![range.start().to_string(), range.end().to_string()],
                |row| row.get(0),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKey;
    use crate::models::{CostSource, RecordSource, UsageRecord};
    use chrono::{NaiveDate, Utc};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(key: &str, date: &str, provider: &str, model: &str, cost: f64) -> UsageRecord {
        UsageRecord {
            identity_key: IdentityKey::from_raw(key),
            date: d(date),
            provider: provider.to_string(),
            model: model.to_string(),
            app: "claude-code".to_string(),
            source: RecordSource::Session,
            input_tokens: 1000,
            output_tokens: 100,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost,
            savings: 0.0,
            cache_write_cost: 0.0,
            unknown_pricing: false,
            cost_source: CostSource::Computed,
            recorded_at: Utc::now(),
        }
    }

    fn seeded() -> UsageStore {
        let store = UsageStore::open_in_memory().unwrap();
        let mut unknown = record("e", "2026-03-03", "anthropic", "claude-unknown-9", 0.0);
        unknown.unknown_pricing = true;
        unknown.source = RecordSource::Manual;
        store
            .upsert_batch(&[
                record("a", "2026-03-01", "anthropic", "claude-sonnet-4-5", 1.0),
                record("b", "2026-03-01", "openai", "gpt-4o", 0.25),
                record("c", "2026-03-02", "anthropic", "claude-opus-4-1", 3.0),
                record("d", "2026-03-05", "anthropic", "claude-sonnet-4-5", 0.5),
                unknown,
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_total_and_daily_agree() {
        let store = seeded();
        let query = UsageQuery::new(&store);
        let range = DateRange::new(d("2026-03-01"), d("2026-03-03")).unwrap();

        let total = query.total_cost(&range).unwrap();
        assert!((total - 4.25).abs() < 1e-9);

        let daily = query.daily_summary(&range).unwrap();
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].record_count, 2);
        assert_eq!(daily[2].date, d("2026-03-03"));
        let sum: f64 = daily.iter().map(|day| day.cost).sum();
        assert!((sum - total).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let store = seeded();
        let query = UsageQuery::new(&store);
        let single = DateRange::day(d("2026-03-05"));
        assert!((query.total_cost(&single).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(query.record_count(&single).unwrap(), 1);
    }

    #[test]
    fn test_empty_range_is_zeroed() {
        let store = seeded();
        let query = UsageQuery::new(&store);
        let empty = DateRange::new(d("2025-01-01"), d("2025-01-31")).unwrap();

        assert_eq!(query.total_cost(&empty).unwrap(), 0.0);
        assert_eq!(query.tokens_summary(&empty).unwrap(), TokensSummary::default());
        assert_eq!(query.savings_summary(&empty).unwrap(), SavingsSummary::default());

        let daily = query.daily_summary(&empty).unwrap();
        assert_eq!(daily.len(), 31);
        assert!(daily.iter().all(|day| day.cost == 0.0 && day.record_count == 0));
        assert_eq!(daily[0].date, d("2025-01-01"));
        assert_eq!(daily[30].date, d("2025-01-31"));
        assert!(query.cost_by_model(&empty).unwrap().is_empty());
        assert!(query.unknown_pricing_models(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_breakdowns() {
        let store = seeded();
        let query = UsageQuery::new(&store);
        let range = DateRange::new(d("2026-03-01"), d("2026-03-31")).unwrap();

        let by_provider = query.cost_by_provider(&range).unwrap();
        assert_eq!(by_provider[0].key, "anthropic");
        assert!((by_provider[0].cost - 4.5).abs() < 1e-9);
        assert_eq!(by_provider[0].record_count, 4);

        let by_model = query.cost_by_model(&range).unwrap();
        assert_eq!(by_model[0].key, "claude-opus-4-1");
        assert_eq!(by_model.len(), 4);
        assert_eq!(by_model[0].total_tokens, 1100);

        let by_source = query.cost_by_source(&range).unwrap();
        let keys: Vec<_> = by_source.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["session", "manual"]);

        let by_app = query.cost_by_app(&range).unwrap();
        assert_eq!(by_app.len(), 1);

        assert_eq!(
            query.unknown_pricing_models(&range).unwrap(),
            vec!["claude-unknown-9"]
        );

        let tokens = query.tokens_summary(&range).unwrap();
        assert_eq!(tokens.input, 5000);
        assert_eq!(tokens.total(), 5500);
    }
}
