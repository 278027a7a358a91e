//! Provider usage API clients.
//!
//! Each configured API key becomes one [`UsageProvider`]. Rows are summed per
//! `(date, model)` within one fetch and keyed with [`IdentityKey::api_row`], so
//! re-fetching a day overwrites the stored rows instead of adding to them.

use std::collections::BTreeMap;
use std::time::Duration;

use ::async_trait::async_trait;
use chrono::NaiveDate;
use costmon_config::ProvidersConfig;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, UsageError};
use crate::identity::{IdentityKey, hash_api_key};
use crate::models::{RawUsageEvent, RecordSource, TokenCounts};
use crate::window::DateRange;

/// App tag stored on rows pulled from provider APIs.
pub const API_APP: &str = "api";

/// Version header the Anthropic API requires.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_ERROR_BODY: usize = 500;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A source of usage rows behind an HTTP API.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Provider name stored on every row
    fn provider(&self) -> &'static str;

    /// Short, non-reversible label for the key this client uses
    fn key_hash(&self) -> &str;

    /// Fetch usage for every day in `range`.
    async fn fetch(&self, range: &DateRange) -> Result<ProviderUsage>;
}

/// What one [`UsageProvider::fetch`] returned.
#[derive(Debug, Default)]
pub struct ProviderUsage {
    pub events: Vec<RawUsageEvent>,
    /// Rows dropped because their date was missing or unreadable
    pub malformed_rows: usize,
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| UsageError::Config(format!("failed to create HTTP client: {e}")))
}

async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UsageError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}

/// Sums token counts per `(date, model)` and turns them into events.
#[derive(Default)]
struct RowAccumulator {
    rows: BTreeMap<(NaiveDate, String), TokenCounts>,
    malformed: usize,
}

impl RowAccumulator {
    fn add(&mut self, date: NaiveDate, model: &str, tokens: TokenCounts) {
        if tokens.is_empty() {
            return;
        }
        let entry = self.rows.entry((date, model.to_string())).or_default();
        entry.input += tokens.input;
        entry.output += tokens.output;
        entry.cache_read += tokens.cache_read;
        entry.cache_creation += tokens.cache_creation;
    }

    fn into_usage(self, provider: &str, key_hash: &str) -> ProviderUsage {
        let events = self
            .rows
            .into_iter()
            .map(|((date, model), tokens)| {
                let key = IdentityKey::api_row(provider, date, key_hash, &model);
                RawUsageEvent::new(date, model, API_APP, RecordSource::Api, tokens, key)
                    .with_provider(provider)
            })
            .collect();
        ProviderUsage {
            events,
            malformed_rows: self.malformed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiUsageResponse {
    #[serde(default)]
    data: Vec<OpenAiUsageRow>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsageRow {
    #[serde(default)]
    snapshot_id: Option<String>,
    #[serde(default)]
    n_context_tokens_total: i64,
    #[serde(default)]
    n_generated_tokens_total: i64,
}

/// OpenAI `/v1/usage` client, one request per day.
pub struct OpenAiUsageClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    key_hash: String,
}

impl OpenAiUsageClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_hash: hash_api_key(&api_key),
            api_key,
        })
    }

    async fn fetch_day(&self, date: NaiveDate, rows: &mut RowAccumulator) -> Result<()> {
        debug!(provider = "openai", key = %self.key_hash, %date, "fetching usage");
        let response = self
            .client
            .get(format!("{}/v1/usage", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("date", date.to_string())])
            .send()
            .await?;
        let body: OpenAiUsageResponse = check_status("openai", response).await?.json().await?;

        for row in body.data {
            let model = row.snapshot_id.as_deref().unwrap_or("unknown");
            let tokens = TokenCounts::new(row.n_context_tokens_total, row.n_generated_tokens_total, 0, 0);
            rows.add(date, model, tokens);
        }
        Ok(())
    }
}

#[async_trait]
impl UsageProvider for OpenAiUsageClient {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn key_hash(&self) -> &str {
        &self.key_hash
    }

    async fn fetch(&self, range: &DateRange) -> Result<ProviderUsage> {
        let mut rows = RowAccumulator::default();
        for date in range.iter_days() {
            self.fetch_day(date, &mut rows).await?;
        }
        Ok(rows.into_usage(self.provider(), &self.key_hash))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicUsageResponse {
    #[serde(default)]
    daily_usage: Vec<AnthropicDailyUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDailyUsage {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    usage: Vec<AnthropicUsageRow>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsageRow {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
    #[serde(default)]
    cache_read_tokens: i64,
    #[serde(default)]
    cache_creation_tokens: i64,
}

/// Anthropic organization usage client, one request per range.
pub struct AnthropicUsageClient {
    client: reqwest::Client,
    base_url: String,
    organization_id: String,
    api_key: String,
    key_hash: String,
}

impl AnthropicUsageClient {
    pub fn new(
        base_url: impl Into<String>,
        organization_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(base_url, organization_id, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        organization_id: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization_id: organization_id.into(),
            key_hash: hash_api_key(&api_key),
            api_key,
        })
    }
}

#[async_trait]
impl UsageProvider for AnthropicUsageClient {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn key_hash(&self) -> &str {
        &self.key_hash
    }

    async fn fetch(&self, range: &DateRange) -> Result<ProviderUsage> {
        debug!(provider = "anthropic", key = %self.key_hash, %range, "fetching usage");
        let response = self
            .client
            .get(format!(
                "{}/v1/organizations/{}/usage",
                self.base_url, self.organization_id
            ))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .query(&[
                ("start_date", range.start().to_string()),
                ("end_date", range.end().to_string()),
            ])
            .send()
            .await?;
        let body: AnthropicUsageResponse =
            check_status("anthropic", response).await?.json().await?;

        let mut rows = RowAccumulator::default();
        for day in body.daily_usage {
            let Some(date) = day
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                debug!(
                    provider = "anthropic",
                    date = ?day.date,
                    rows = day.usage.len(),
                    "skipping usage day with unreadable date"
                );
                rows.malformed += day.usage.len();
                continue;
            };
            if !range.contains(date) {
                continue;
            }
            for row in day.usage {
                let model = row.model.as_deref().unwrap_or("unknown");
                let tokens = TokenCounts::new(
                    row.input_tokens,
                    row.output_tokens,
                    row.cache_read_tokens,
                    row.cache_creation_tokens,
                );
                rows.add(date, model, tokens);
            }
        }
        Ok(rows.into_usage(self.provider(), &self.key_hash))
    }
}

/// Build one client per configured key.
///
/// Anthropic keys without an organization id are ignored. No usable key at
/// all is [`UsageError::ConfigMissing`], raised before any request is made.
pub fn clients_from_config(config: &ProvidersConfig) -> Result<Vec<Box<dyn UsageProvider>>> {
    if !config.has_credentials() {
        return Err(UsageError::ConfigMissing(
            "no provider API keys configured (providers.openai.keys, or providers.anthropic.keys with organization_id)"
                .to_string(),
        ));
    }
    let mut clients: Vec<Box<dyn UsageProvider>> = Vec::new();
    for key in config.openai.keys.iter().filter(|k| !k.is_empty()) {
        clients.push(Box::new(OpenAiUsageClient::new(&config.openai.base_url, key)?));
    }
    if config.anthropic.is_usable()
        && let Some(org) = config.anthropic.organization_id.as_deref()
    {
        for key in config.anthropic.keys.iter().filter(|k| !k.is_empty()) {
            clients.push(Box::new(AnthropicUsageClient::new(
                &config.anthropic.base_url,
                org,
                key,
            )?));
        }
    }
    Ok(clients)
}
