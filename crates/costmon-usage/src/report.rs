//! Report building and rendering.
//!
//! [`UsageReport::build`] runs the aggregate queries for a period; the
//! render functions turn the result into Markdown, JSON or HTML without
//! touching storage or the network.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::budget::{BudgetPolicy, BudgetStatus};
use crate::error::{Result, UsageError};
use crate::models::{CostBreakdown, DailySummary, SavingsSummary, TokensSummary};
use crate::query::UsageQuery;
use crate::window::DateRange;

/// Models listed in the text report.
pub const TOP_MODELS: usize = 10;

/// Bars drawn per section of the HTML report.
const HTML_TOP_MODELS: usize = 8;

const HTML_TEMPLATE: &str = include_str!("../templates/report.html.hbs");

/// Format a dollar amount: two decimals from $1 up, four below.
pub fn format_cost(cost: f64) -> String {
    if cost >= 1.0 {
        format!("${cost:.2}")
    } else {
        format!("${cost:.4}")
    }
}

/// Thousands-separated token count.
pub fn format_tokens(tokens: i64) -> String {
    let digits = tokens.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if tokens < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Share of `total` for each item, in percent. All zero when `total` is zero.
pub fn percentages(items: &[CostBreakdown], total: f64) -> Vec<f64> {
    items
        .iter()
        .map(|item| if total > 0.0 { item.cost / total * 100.0 } else { 0.0 })
        .collect()
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Named report period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Today,
    Yesterday,
    /// Seven days back through today
    Week,
    /// Thirty days back through today
    Month,
    Custom(DateRange),
}

impl ReportPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" => Some(Self::Today),
            "yesterday" => Some(Self::Yesterday),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Key used in JSON output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Week => "week",
            Self::Month => "month",
            Self::Custom(_) => "custom",
        }
    }

    /// Human heading.
    pub fn label(&self) -> String {
        match self {
            Self::Today => "Today".to_string(),
            Self::Yesterday => "Yesterday".to_string(),
            Self::Week => "This Week".to_string(),
            Self::Month => "This Month".to_string(),
            Self::Custom(range) => range.to_string(),
        }
    }

    pub fn range(&self, today: NaiveDate) -> DateRange {
        match self {
            Self::Today => DateRange::day(today),
            Self::Yesterday => DateRange::day(today - Duration::days(1)),
            Self::Week => DateRange::last_days(today, 8),
            Self::Month => DateRange::last_days(today, 31),
            Self::Custom(range) => *range,
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output format of `costmon report`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Html,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "markdown" | "md" => Some(Self::Text),
            "json" => Some(Self::Json),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Spend of the report period against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetLine {
    pub limit: f64,
    pub used: f64,
    pub percentage: f64,
    pub status: BudgetStatus,
}

/// Every aggregate a report shows.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    pub period: ReportPeriod,
    pub range: DateRange,
    pub total_cost: f64,
    pub tokens: TokensSummary,
    pub savings: SavingsSummary,
    pub by_provider: Vec<CostBreakdown>,
    pub by_model: Vec<CostBreakdown>,
    pub by_app: Vec<CostBreakdown>,
    pub by_source: Vec<CostBreakdown>,
    pub daily: Vec<DailySummary>,
    pub budget: Option<BudgetLine>,
    pub unknown_pricing_models: Vec<String>,
    /// When the queries ran; rendering reads this instead of the clock
    pub generated_at: DateTime<Utc>,
}

impl UsageReport {
    /// Run the queries for `period` ending `today`.
    pub fn build(
        query: &UsageQuery<'_>,
        period: ReportPeriod,
        today: NaiveDate,
        budget: Option<&BudgetPolicy>,
    ) -> Result<Self> {
        let range = period.range(today);
        let total_cost = query.total_cost(&range)?;
        let budget = budget.map(|policy| BudgetLine {
            limit: policy.ceiling(),
            used: total_cost,
            percentage: total_cost / policy.ceiling() * 100.0,
            status: policy.classify(total_cost),
        });

        Ok(Self {
            period,
            range,
            total_cost,
            tokens: query.tokens_summary(&range)?,
            savings: query.savings_summary(&range)?,
            by_provider: query.cost_by_provider(&range)?,
            by_model: query.cost_by_model(&range)?,
            by_app: query.cost_by_app(&range)?,
            by_source: query.cost_by_source(&range)?,
            daily: query.daily_summary(&range)?,
            budget,
            unknown_pricing_models: query.unknown_pricing_models(&range)?,
            generated_at: Utc::now(),
        })
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(render_text(self)),
            OutputFormat::Json => render_json(self),
            OutputFormat::Html => render_html(self),
        }
    }
}

/// Markdown report.
pub fn render_text(report: &UsageReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# 💰 LLM Cost Report - {}\n\n", report.period.label()));
    out.push_str(&format!("Period: {}\n\n", report.range));
    out.push_str(&format!("**Total Cost:** {}\n\n", format_cost(report.total_cost)));

    let t = &report.tokens;
    out.push_str(&format!(
        "**Tokens:** {} (input {}, output {}, cache read {}, cache write {})\n",
        format_tokens(t.total()),
        format_tokens(t.input),
        format_tokens(t.output),
        format_tokens(t.cache_read),
        format_tokens(t.cache_creation)
    ));
    let s = &report.savings;
    if s.read_savings > 0.0 || s.write_cost > 0.0 {
        out.push_str(&format!(
            "**Cache savings:** {} (reads saved {}, write premium {})\n",
            format_cost(s.total_savings()),
            format_cost(s.read_savings),
            format_cost(s.write_cost)
        ));
    }

    if !report.by_provider.is_empty() {
        out.push_str("\n## 📊 By Provider\n\n");
        push_breakdown(&mut out, &report.by_provider, report.total_cost, usize::MAX);
    }
    if !report.by_model.is_empty() {
        out.push_str("\n## 📈 By Model\n\n");
        push_breakdown(&mut out, &report.by_model, report.total_cost, TOP_MODELS);
        if report.by_model.len() > TOP_MODELS {
            out.push_str(&format!("- … {} more\n", report.by_model.len() - TOP_MODELS));
        }
    }
    if report.by_app.len() > 1 {
        out.push_str("\n## 🧩 By App\n\n");
        push_breakdown(&mut out, &report.by_app, report.total_cost, usize::MAX);
    }

    if let Some(budget) = &report.budget {
        out.push_str(&format!(
            "\n🎯 Budget: {} / {} ({:.0}%) {}\n",
            format_cost(budget.used),
            format_cost(budget.limit),
            budget.percentage,
            budget.status.indicator()
        ));
    }
    if !report.unknown_pricing_models.is_empty() {
        out.push_str(&format!(
            "\n⚠️ No pricing for: {} (counted at $0)\n",
            report.unknown_pricing_models.join(", ")
        ));
    }
    out
}

fn push_breakdown(out: &mut String, items: &[CostBreakdown], total: f64, limit: usize) {
    let shares = percentages(items, total);
    for (item, pct) in items.iter().zip(shares).take(limit) {
        out.push_str(&format!("- {}: {} ({pct:.0}%)\n", item.key, format_cost(item.cost)));
    }
}

fn cost_map(items: &[CostBreakdown]) -> Value {
    let map: Map<String, Value> = items
        .iter()
        .map(|item| (item.key.clone(), json!(round6(item.cost))))
        .collect();
    Value::Object(map)
}

/// JSON report. Money is rounded to six decimals.
pub fn render_json(report: &UsageReport) -> Result<String> {
    let t = &report.tokens;
    let s = &report.savings;
    let daily: Vec<Value> = report
        .daily
        .iter()
        .map(|day| {
            json!({
                "date": day.date.to_string(),
                "cost": round6(day.cost),
                "tokens": day.tokens.total(),
                "records": day.record_count,
            })
        })
        .collect();

    let mut output = json!({
        "period": report.period.name(),
        "start_date": report.range.start().to_string(),
        "end_date": report.range.end().to_string(),
        "total_cost": round6(report.total_cost),
        "tokens": {
            "input": t.input,
            "output": t.output,
            "cache_read": t.cache_read,
            "cache_write": t.cache_creation,
            "total": t.total(),
        },
        "cache_savings": {
            "read_savings": round6(s.read_savings),
            "write_cost": round6(s.write_cost),
            "total_savings": round6(s.total_savings()),
        },
        "by_provider": cost_map(&report.by_provider),
        "by_model": cost_map(&report.by_model),
        "by_app": cost_map(&report.by_app),
        "by_source": cost_map(&report.by_source),
        "daily": daily,
        "unknown_pricing_models": report.unknown_pricing_models,
    });

    if let Some(budget) = &report.budget
        && let Some(obj) = output.as_object_mut()
    {
        obj.insert(
            "budget".to_string(),
            json!({
                "limit": budget.limit,
                "used": round6(budget.used),
                "percentage": (budget.percentage * 10.0).round() / 10.0,
                "status": budget.status,
            }),
        );
    }

    Ok(serde_json::to_string_pretty(&output)?)
}

#[derive(Serialize)]
struct HtmlBar {
    name: String,
    cost: String,
    width: String,
    color: &'static str,
}

#[derive(Serialize)]
struct HtmlBudget {
    width: String,
    color: &'static str,
    text: String,
}

#[derive(Serialize)]
struct HtmlView {
    label: String,
    period: String,
    total: String,
    tokens: String,
    savings: Option<String>,
    providers: Vec<HtmlBar>,
    models: Vec<HtmlBar>,
    budget: Option<HtmlBudget>,
    unknown_models: Option<String>,
    generated_at: String,
}

fn provider_color(provider: &str) -> &'static str {
    match provider {
        "unknown" => "#FF6B6B",
        "anthropic" => "#4ECDC4",
        "openai" => "#45B7D1",
        _ => "#96CEB4",
    }
}

/// Bars scaled so the largest item fills the row.
fn bars(items: &[CostBreakdown], limit: usize, color: impl Fn(&str) -> &'static str) -> Vec<HtmlBar> {
    let max = items.iter().map(|i| i.cost).fold(0.0_f64, f64::max);
    items
        .iter()
        .take(limit)
        .map(|item| {
            let width = if max > 0.0 { item.cost / max * 100.0 } else { 0.0 };
            HtmlBar {
                name: item.key.clone(),
                cost: format_cost(item.cost),
                width: format!("{width:.1}"),
                color: color(&item.key),
            }
        })
        .collect()
}

/// Standalone HTML page.
pub fn render_html(report: &UsageReport) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_template_string("report", HTML_TEMPLATE)
        .map_err(|e| UsageError::Template(e.to_string()))?;

    let s = &report.savings;
    let view = HtmlView {
        label: report.period.label(),
        period: report.range.to_string(),
        total: format_cost(report.total_cost),
        tokens: format_tokens(report.tokens.total()),
        savings: (s.read_savings > 0.0 || s.write_cost > 0.0).then(|| format_cost(s.total_savings())),
        providers: bars(&report.by_provider, usize::MAX, provider_color),
        models: bars(&report.by_model, HTML_TOP_MODELS, |_| "#764ba2"),
        budget: report.budget.map(|b| HtmlBudget {
            width: format!("{:.1}", b.percentage.min(100.0)),
            color: match b.status {
                BudgetStatus::Ok => "#4ECDC4",
                BudgetStatus::Warning => "#FFE66D",
                BudgetStatus::Exceeded => "#FF6B6B",
            },
            text: format!(
                "{} / {} ({:.0}%) {}",
                format_cost(b.used),
                format_cost(b.limit),
                b.percentage,
                b.status.indicator()
            ),
        }),
        unknown_models: (!report.unknown_pricing_models.is_empty())
            .then(|| report.unknown_pricing_models.join(", ")),
        generated_at: report.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
    };

    handlebars
        .render("report", &view)
        .map_err(|e| UsageError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use costmon_config::BudgetMode;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn item(key: &str, cost: f64) -> CostBreakdown {
        CostBreakdown {
            key: key.to_string(),
            cost,
            total_tokens: 1000,
            record_count: 1,
        }
    }

    fn sample() -> UsageReport {
        let policy = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();
        UsageReport {
            period: ReportPeriod::Today,
            range: DateRange::day(d("2026-03-01")),
            total_cost: 3.0,
            tokens: TokensSummary {
                input: 1200,
                output: 340,
                cache_read: 1_000_000,
                cache_creation: 0,
            },
            savings: SavingsSummary {
                read_savings: 2.7,
                write_cost: 0.0,
            },
            by_provider: vec![item("anthropic", 2.0), item("openai", 1.0)],
            by_model: vec![item("claude-sonnet-4-5", 2.0), item("gpt-4o", 0.6), item("<b>", 0.4)],
            by_app: vec![item("claude-code", 3.0)],
            by_source: vec![item("session", 3.0)],
            daily: vec![],
            budget: Some(BudgetLine {
                limit: 100.0,
                used: 3.0,
                percentage: 3.0,
                status: policy.classify(3.0),
            }),
            unknown_pricing_models: vec!["claude-unknown-9".into()],
            generated_at: DateTime::parse_from_rfc3339("2026-03-01T18:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(12.345), "$12.35");
        assert_eq!(format_cost(1.0), "$1.00");
        assert_eq!(format_cost(0.01234), "$0.0123");
        assert_eq!(format_cost(0.0), "$0.0000");
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(1_234_567), "1,234,567");
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let items = vec![item("a", 1.0), item("b", 1.0), item("c", 1.0)];
        let total: f64 = percentages(&items, 3.0).iter().sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!(percentages(&items, 0.0).iter().all(|p| *p == 0.0));
    }

    #[test]
    fn test_period_ranges() {
        let today = d("2026-03-15");
        assert_eq!(ReportPeriod::Yesterday.range(today), DateRange::day(d("2026-03-14")));
        assert_eq!(ReportPeriod::Week.range(today).start(), d("2026-03-08"));
        assert_eq!(ReportPeriod::Month.range(today).start(), d("2026-02-13"));
        assert_eq!(ReportPeriod::parse("bogus"), None);
    }

    #[test]
    fn test_text_report() {
        let text = render_text(&sample());
        assert!(text.contains("LLM Cost Report - Today"));
        assert!(text.contains("**Total Cost:** $3.00"));
        assert!(text.contains("- anthropic: $2.00 (67%)"));
        assert!(text.contains("- gpt-4o: $0.6000 (20%)"));
        assert!(text.contains("🎯 Budget: $3.00 / $100.00 (3%) ✅"));
        assert!(text.contains("No pricing for: claude-unknown-9"));
        assert!(text.contains("1,001,540"));
    }

    #[test]
    fn test_json_report() {
        let json: Value = serde_json::from_str(&render_json(&sample()).unwrap()).unwrap();
        assert_eq!(json["period"], "today");
        assert_eq!(json["start_date"], "2026-03-01");
        assert_eq!(json["total_cost"], 3.0);
        assert_eq!(json["tokens"]["cache_read"], 1_000_000);
        assert_eq!(json["cache_savings"]["total_savings"], 2.7);
        assert_eq!(json["by_provider"]["openai"], 1.0);
        assert_eq!(json["budget"]["status"], "ok");
        assert_eq!(json["unknown_pricing_models"][0], "claude-unknown-9");
    }

    #[test]
    fn test_html_report() {
        let html = render_html(&sample()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("LLM Cost Report - Today"));
        assert!(html.contains("width: 100.0%"));
        assert!(html.contains("width: 50.0%"));
        // Model names are escaped
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("claude-unknown-9"));
        assert!(html.contains("Generated 2026-03-01 18:30 UTC"));
    }

    #[test]
    fn test_rendering_is_repeatable() {
        let report = sample();
        for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Html] {
            assert_eq!(report.render(format).unwrap(), report.render(format).unwrap());
        }
    }
}
