//! Integration tests for costmon-usage with mock log trees and a mock usage API.

use chrono::{NaiveDate, Utc};
use costmon_config::{BudgetMode, ProvidersConfig};
use costmon_usage::budget::{self, BudgetPeriod, BudgetPolicy, BudgetStatus};
use costmon_usage::providers::{AnthropicUsageClient, OpenAiUsageClient, UsageProvider};
use costmon_usage::{
    CostSource, DateRange, IdentityKey, Ingestor, LogSource, OutputFormat, PricingTable,
    RecordSource, ReportPeriod, UsageError, UsageQuery, UsageRecord, UsageReport, UsageStore,
    clients_from_config,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Claude Code transcript: two streamed copies of msg_01, one of msg_02, noise.
/// Timestamps are unix seconds at noon UTC so the local date is stable.
const CLAUDE_SESSION: &str = r#"{"type":"user","message":{"role":"user","content":"hello"}}
{"type":"assistant","requestId":"req_1","timestamp":1772366400,"message":{"id":"msg_01","model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":1000,"output_tokens":100,"cache_read_input_tokens":20000,"cache_creation_input_tokens":500}}}
{"type":"assistant","requestId":"req_1","timestamp":1772366400,"message":{"id":"msg_01","model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":1000,"output_tokens":400,"cache_read_input_tokens":20000,"cache_creation_input_tokens":500}}}
{"type":"assistant","requestId":"req_2","timestamp":1772452800,"message":{"id":"msg_02","model":"claude-opus-4-1","usage":{"input_tokens":300,"output_tokens":50}}}
not json at all
{"type":"summary","summary":"greeting"}
"#;

/// OpenClaw session with client-reported cost and an unknown model.
const AGENT_SESSION: &str = r#"{"type":"session","id":"s1"}
{"type":"message","id":"a1","timestamp":"2026-03-02T12:00:00Z","message":{"role":"assistant","provider":"anthropic","model":"claude-unknown-9","usage":{"input":1200,"output":340,"cacheRead":0,"cacheWrite":0}}}
{"type":"message","id":"a2","timestamp":"2026-03-02T12:05:00Z","message":{"role":"assistant","provider":"zhipu","model":"glm-4.7","usage":{"input":5000,"output":2000,"cost":{"total":0.35}}}}
{"type":"message","id":"u1","timestamp":"2026-03-02T12:06:00Z","message":{"role":"user","content":"thanks"}}
"#;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn march() -> DateRange {
    DateRange::new(d("2026-03-01"), d("2026-03-31")).unwrap()
}

fn write_tree(root: &Path) -> Vec<LogSource> {
    fs::create_dir_all(root.join("claude/project-a")).unwrap();
    fs::create_dir_all(root.join("agent/main")).unwrap();
    fs::write(root.join("claude/project-a/session.jsonl"), CLAUDE_SESSION).unwrap();
    fs::write(root.join("claude/project-a/notes.txt"), "ignored").unwrap();
    fs::write(root.join("agent/main/s1.jsonl"), AGENT_SESSION).unwrap();
    vec![
        LogSource::new("claude-code", root.join("claude")),
        LogSource::new("openclaw", root.join("agent")),
    ]
}

fn ingest(store: &UsageStore, pricing: &PricingTable, sources: Vec<LogSource>) {
    let mut ingestor = Ingestor::new(store, pricing);
    ingestor.ingest_logs(sources, None).unwrap();
    ingestor.finish().unwrap();
}

fn record(key: &str, date: &str, cost: f64) -> UsageRecord {
    UsageRecord {
        identity_key: IdentityKey::from_raw(key),
        date: d(date),
        provider: "openai".into(),
        model: "gpt-4o".into(),
        app: "manual".into(),
        source: RecordSource::Manual,
        input_tokens: 10,
        output_tokens: 10,
        cache_read_tokens: 0,
        cache_creation_tokens: 0,
        cost,
        savings: 0.0,
        cache_write_cost: 0.0,
        unknown_pricing: false,
        cost_source: CostSource::Provider,
        recorded_at: Utc::now(),
    }
}

#[test]
fn test_ingestion_is_idempotent() {
    let logs = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let sources = write_tree(logs.path());
    let store = UsageStore::open_in_dir(db_dir.path()).unwrap();
    let pricing = PricingTable::builtin();

    ingest(&store, &pricing, sources.clone());
    let query = UsageQuery::new(&store);
    let first_total = query.total_cost(&march()).unwrap();
    let first_tokens = query.tokens_summary(&march()).unwrap();
    let first_count = store.record_count().unwrap();

    for _ in 0..3 {
        ingest(&store, &pricing, sources.clone());
    }

    assert_eq!(store.record_count().unwrap(), first_count);
    assert!((query.total_cost(&march()).unwrap() - first_total).abs() < 1e-9);
    assert_eq!(query.tokens_summary(&march()).unwrap(), first_tokens);
    // msg_01 (collapsed), msg_02, a1, a2
    assert_eq!(first_count, 4);
    // The streamed copy with the final output count wins
    assert_eq!(first_tokens.output, 400 + 50 + 340 + 2000);
}

#[test]
fn test_daily_rows_sum_to_total() {
    let logs = tempdir().unwrap();
    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    ingest(&store, &pricing, write_tree(logs.path()));

    let query = UsageQuery::new(&store);
    let total = query.total_cost(&march()).unwrap();
    let daily = query.daily_summary(&march()).unwrap();
    let summed: f64 = daily.iter().map(|day| day.cost).sum();

    assert!(total > 0.0);
    assert!((summed - total).abs() < 1e-9);
    let records: i64 = daily.iter().map(|day| day.record_count).sum();
    assert_eq!(records, 4);
}

#[test]
fn test_unknown_model_and_reported_cost() {
    let logs = tempdir().unwrap();
    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    ingest(&store, &pricing, write_tree(logs.path()));

    let query = UsageQuery::new(&store);
    assert_eq!(
        query.unknown_pricing_models(&march()).unwrap(),
        vec!["claude-unknown-9"]
    );

    let by_model = query.cost_by_model(&march()).unwrap();
    let unknown = by_model.iter().find(|b| b.key == "claude-unknown-9").unwrap();
    assert_eq!(unknown.cost, 0.0);
    assert_eq!(unknown.total_tokens, 1540);

    let glm = by_model.iter().find(|b| b.key == "glm-4.7").unwrap();
    assert!((glm.cost - 0.35).abs() < 1e-9);

    let by_app = query.cost_by_app(&march()).unwrap();
    assert_eq!(by_app.len(), 2);
}

#[test]
fn test_savings_are_bounded() {
    let logs = tempdir().unwrap();
    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    ingest(&store, &pricing, write_tree(logs.path()));

    let query = UsageQuery::new(&store);
    let savings = query.savings_summary(&march()).unwrap();
    // 20k sonnet cache reads at $3.00 input vs $0.30 read
    assert!((savings.read_savings - 0.054).abs() < 1e-9);
    assert!(savings.read_savings >= 0.0);
    assert!(savings.read_savings <= 20_000.0 * 3.0 / 1_000_000.0);
}

#[test]
fn test_empty_range_reports_zero() {
    let store = UsageStore::open_in_memory().unwrap();
    let query = UsageQuery::new(&store);
    let range = DateRange::new(d("2020-01-01"), d("2020-01-31")).unwrap();

    assert_eq!(query.total_cost(&range).unwrap(), 0.0);
    assert_eq!(query.tokens_summary(&range).unwrap().total(), 0);
    assert!(query.cost_by_provider(&range).unwrap().is_empty());

    let short = DateRange::new(d("2020-01-01"), d("2020-01-03")).unwrap();
    let daily = query.daily_summary(&short).unwrap();
    assert_eq!(daily.len(), 3);
    assert_eq!(
        daily.iter().map(|day| day.date).collect::<Vec<_>>(),
        vec![d("2020-01-01"), d("2020-01-02"), d("2020-01-03")]
    );
    assert!(daily.iter().all(|day| day.cost == 0.0 && day.tokens.total() == 0));

    let report = UsageReport::build(&query, ReportPeriod::Custom(range), d("2020-01-31"), None).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
    assert_eq!(json["total_cost"], 0.0);
    assert_eq!(json["period"], "custom");
    assert!(json.get("budget").is_none());
    assert_eq!(json["daily"].as_array().unwrap().len(), 31);
}

#[test]
fn test_daily_summary_fills_gaps() {
    let logs = tempdir().unwrap();
    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    ingest(&store, &pricing, write_tree(logs.path()));

    let query = UsageQuery::new(&store);
    let range = DateRange::new(d("2026-02-28"), d("2026-03-04")).unwrap();
    let daily = query.daily_summary(&range).unwrap();

    assert_eq!(daily.len(), 5);
    assert_eq!(daily[0].record_count, 0);
    assert!(daily[1].record_count > 0);
    assert!(daily[2].record_count > 0);
    assert_eq!(daily[3].cost, 0.0);
    assert_eq!(daily[4].record_count, 0);
}

#[test]
fn test_same_key_replaces_row() {
    let store = UsageStore::open_in_memory().unwrap();
    store.upsert(&record("k1", "2026-03-05", 1.0)).unwrap();
    store.upsert(&record("k1", "2026-03-05", 2.5)).unwrap();

    let query = UsageQuery::new(&store);
    assert_eq!(store.record_count().unwrap(), 1);
    assert!((query.total_cost(&march()).unwrap() - 2.5).abs() < 1e-9);
}

#[test]
fn test_invalid_range_is_rejected() {
    assert!(DateRange::new(d("2026-03-05"), d("2026-03-01")).is_err());
    assert!(DateRange::parse("2026-03-01", "not-a-date").is_err());
}

#[test]
fn test_budget_scenarios() {
    let store = UsageStore::open_in_memory().unwrap();
    store.upsert(&record("a", "2026-03-02", 60.0)).unwrap();
    store.upsert(&record("b", "2026-03-09", 25.0)).unwrap();
    let query = UsageQuery::new(&store);
    let today = d("2026-03-20");

    let strict = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();
    let check = budget::check(&query, &strict, BudgetPeriod::Month, today).unwrap();
    assert_eq!(check.status, BudgetStatus::Warning);
    assert!(!check.is_fatal());

    store.upsert(&record("c", "2026-03-19", 15.0)).unwrap();
    let check = budget::check(&query, &strict, BudgetPeriod::Month, today).unwrap();
    assert_eq!(check.status, BudgetStatus::Exceeded);
    assert!(check.is_fatal());

    let warn = BudgetPolicy::new(100.0, 0.8, BudgetMode::Warn).unwrap();
    let check = budget::check(&query, &warn, BudgetPeriod::Month, today).unwrap();
    assert_eq!(check.status, BudgetStatus::Exceeded);
    assert!(!check.is_fatal());

    // Only the last week counts
    let check = budget::check(&query, &strict, BudgetPeriod::Week, today).unwrap();
    assert_eq!(check.status, BudgetStatus::Ok);
}

#[test]
fn test_text_report_from_store() {
    let logs = tempdir().unwrap();
    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    ingest(&store, &pricing, write_tree(logs.path()));

    let query = UsageQuery::new(&store);
    let policy = BudgetPolicy::new(100.0, 0.8, BudgetMode::Strict).unwrap();
    let report = UsageReport::build(
        &query,
        ReportPeriod::Custom(march()),
        d("2026-03-31"),
        Some(&policy),
    )
    .unwrap();

    let text = report.render(OutputFormat::Text).unwrap();
    assert!(text.contains("## 📊 By Provider"));
    assert!(text.contains("claude-sonnet-4-5-20250929"));
    assert!(text.contains("🎯 Budget:"));
    assert!(text.contains("No pricing for: claude-unknown-9"));

    let html = report.render(OutputFormat::Html).unwrap();
    assert!(html.contains("By Model"));
    assert_eq!(html, report.render(OutputFormat::Html).unwrap());
}

#[tokio::test]
async fn test_api_fetch_does_not_double_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"snapshot_id": "gpt-4o", "n_context_tokens_total": 1000000, "n_generated_tokens_total": 0}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/organizations/org-1/usage"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = UsageStore::open_in_memory().unwrap();
    let pricing = PricingTable::builtin();
    let clients: Vec<Box<dyn UsageProvider>> = vec![
        Box::new(AnthropicUsageClient::new(server.uri(), "org-1", "sk-ant").unwrap()),
        Box::new(OpenAiUsageClient::new(server.uri(), "sk-openai").unwrap()),
    ];
    let range = DateRange::day(d("2026-03-03"));

    for _ in 0..2 {
        let mut ingestor = Ingestor::new(&store, &pricing);
        ingestor.ingest_api(&clients, &range).await.unwrap();
        let summary = ingestor.finish().unwrap();
        // The failing Anthropic key does not stop the OpenAI one
        assert_eq!(summary.api_clients, 2);
        assert_eq!(summary.api_failures, 1);
        assert_eq!(summary.records_written, 1);
    }

    let query = UsageQuery::new(&store);
    assert_eq!(store.record_count().unwrap(), 1);
    assert!((query.total_cost(&range).unwrap() - 2.5).abs() < 1e-9);
    let by_source = query.cost_by_source(&range).unwrap();
    assert_eq!(by_source[0].key, "api");
}

#[test]
fn test_api_fetch_without_keys_is_config_missing() {
    let store = UsageStore::open_in_memory().unwrap();

    let err = match clients_from_config(&ProvidersConfig::default()) {
        Ok(clients) => panic!("expected no clients, got {}", clients.len()),
        Err(e) => e,
    };
    assert!(matches!(err, UsageError::ConfigMissing(_)));
    assert!(err.guidance().is_some());
    assert_eq!(store.record_count().unwrap(), 0);
}

