//! Session log parser: turns JSON-lines logs into raw usage events.
//!
//! Supported record shapes:
//! - Claude Code transcripts: `{"type":"assistant","message":{"id","model","usage"}}`
//! - OpenClaw sessions: `{"type":"message","message":{"provider","model","usage":{"cost":{..}}}}`
//! - Headless agent summaries: `{"type":"result","total_cost_usd","usage","modelUsage"}`
//! - OpenAI-compatible responses: `{"model","usage":{"prompt_tokens","completion_tokens"}}`
//!
//! Each line is parsed independently. A line that is not JSON is counted as
//! malformed and skipped; JSON of an unknown shape is counted as unrecognized.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use costmon_config::SourceConfig;
use costmon_core::paths;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::identity::IdentityKey;
use crate::models::{RawUsageEvent, RecordSource, TokenCounts};
use crate::window::DateRange;

/// A directory of session logs produced by one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    /// App tag stored on every record (`claude-code`, `openclaw`, ...)
    pub app: String,
    pub root: PathBuf,
    /// File extension without the dot
    pub extension: String,
    /// Provider assumed when a record does not name one
    pub provider: Option<String>,
}

impl LogSource {
    pub fn new(app: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            app: app.into(),
            root: root.into(),
            extension: "jsonl".to_string(),
            provider: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Claude Code and OpenClaw session directories under `$HOME`.
    pub fn defaults() -> Result<Vec<Self>> {
        let home = paths::home_dir()?;
        Ok(vec![
            Self::new("claude-code", home.join(".claude").join("projects")),
            Self::new("openclaw", home.join(".openclaw").join("agents")),
        ])
    }

    /// Source declared in the config file, with `~` expanded.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let mut source = Self::new(config.app.clone(), paths::expand_tilde(&config.root)?)
            .with_extension(config.extension.clone());
        source.provider = config.provider.clone();
        Ok(source)
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }
}

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files_scanned: usize,
    /// Files modified before the window start, never opened
    pub files_skipped: usize,
    pub files_failed: usize,
    pub lines_read: usize,
    pub events_emitted: usize,
    pub malformed_lines: usize,
    pub unrecognized_records: usize,
    pub out_of_window: usize,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.files_scanned += other.files_scanned;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
        self.lines_read += other.lines_read;
        self.events_emitted += other.events_emitted;
        self.malformed_lines += other.malformed_lines;
        self.unrecognized_records += other.unrecognized_records;
        self.out_of_window += other.out_of_window;
    }
}

// ============================================================================
// Record shapes
// ============================================================================

/// Anthropic `usage` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_creation_input_tokens: Option<i64>,
    pub cache_read_input_tokens: Option<i64>,
}

impl AnthropicUsage {
    fn tokens(&self) -> TokenCounts {
        TokenCounts::new(
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
            self.cache_read_input_tokens.unwrap_or(0),
            self.cache_creation_input_tokens.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageBody {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<AnthropicUsage>,
}

/// Claude Code transcript line for one assistant response.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub message: AnthropicMessageBody,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentCost {
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUsage {
    pub input: Option<i64>,
    pub output: Option<i64>,
    pub cache_read: Option<i64>,
    pub cache_write: Option<i64>,
    pub cost: Option<AgentCost>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessageBody {
    pub role: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<AgentUsage>,
}

/// OpenClaw session line; carries a client-computed cost.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessage {
    pub id: Option<String>,
    pub timestamp: Option<Value>,
    pub message: AgentMessageBody,
}

/// Headless agent run summary.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResult {
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<AnthropicUsage>,
    #[serde(rename = "modelUsage")]
    pub model_usage: Option<BTreeMap<String, Value>>,
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

/// OpenAI-compatible chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub id: Option<String>,
    pub model: String,
    pub created: Option<i64>,
    pub usage: ChatUsage,
}

/// One parsed log line.
#[derive(Debug, Clone)]
pub enum LogRecord {
    AnthropicMessage(AnthropicMessage),
    AgentMessage(AgentMessage),
    SessionResult(SessionResult),
    ChatCompletion(ChatCompletion),
    /// Known record type that never carries usage (user turns, summaries)
    NonUsage,
    /// Valid JSON of an unknown shape
    Unrecognized,
}

/// Record types clients write that hold no token usage.
const NON_USAGE_TYPES: &[&str] = &[
    "user",
    "system",
    "summary",
    "session",
    "model_change",
    "thinking_level_change",
    "custom",
    "file-history-snapshot",
    "queue-operation",
];

/// Parse one line. Errors only for text that is not a JSON object.
pub fn parse_line(line: &str) -> std::result::Result<LogRecord, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if !value.is_object() {
        return Ok(LogRecord::Unrecognized);
    }

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    let record = match kind.as_deref() {
        Some("assistant") => serde_json::from_value(value).map(LogRecord::AnthropicMessage),
        Some("message") => serde_json::from_value(value).map(LogRecord::AgentMessage),
        Some("result") => serde_json::from_value(value).map(LogRecord::SessionResult),
        Some(kind) if NON_USAGE_TYPES.contains(&kind) => Ok(LogRecord::NonUsage),
        _ if value.get("model").is_some()
            && value.get("usage").is_some_and(|u| u.get("prompt_tokens").is_some()) =>
        {
            serde_json::from_value(value).map(LogRecord::ChatCompletion)
        }
        _ => Ok(LogRecord::Unrecognized),
    };
    // A known type with an unexpected layout is a shape we do not understand
    Ok(record.unwrap_or(LogRecord::Unrecognized))
}

/// Where a line came from, used to build its event.
#[derive(Debug, Clone, Copy)]
pub struct LineContext<'a> {
    pub app: &'a str,
    pub provider: Option<&'a str>,
    pub path: &'a Path,
    /// 1-based
    pub line: usize,
    /// Date used when the record has no timestamp (file modification date)
    pub fallback_date: NaiveDate,
}

impl<'a> LineContext<'a> {
    fn key_for(&self, message_id: Option<&str>, request_id: Option<&str>) -> IdentityKey {
        match message_id.filter(|id| !id.is_empty()) {
            Some(id) => IdentityKey::session_message(self.app, id, request_id),
            None => IdentityKey::session_line(self.app, self.path, self.line),
        }
    }

    fn date_of(&self, timestamp: Option<&Value>) -> NaiveDate {
        timestamp.and_then(timestamp_to_date).unwrap_or(self.fallback_date)
    }
}

impl LogRecord {
    /// Convert to a raw usage event. `None` for records without token usage.
    pub fn into_event(self, ctx: &LineContext<'_>) -> Option<RawUsageEvent> {
        let event = match self {
            LogRecord::AnthropicMessage(record) => {
                let tokens = record.message.usage.as_ref()?.tokens();
                if tokens.is_empty() {
                    return None;
                }
                let key = ctx.key_for(record.message.id.as_deref(), record.request_id.as_deref());
                let model = record.message.model.unwrap_or_else(|| "unknown".to_string());
                let mut event = RawUsageEvent::new(
                    ctx.date_of(record.timestamp.as_ref()),
                    model,
                    ctx.app,
                    RecordSource::Session,
                    tokens,
                    key,
                );
                event.provider = ctx.provider.map(str::to_string);
                event
            }
            LogRecord::AgentMessage(record) => {
                if record.message.role.as_deref().is_some_and(|r| r != "assistant") {
                    return None;
                }
                let usage = record.message.usage?;
                let tokens = TokenCounts::new(
                    usage.input.unwrap_or(0),
                    usage.output.unwrap_or(0),
                    usage.cache_read.unwrap_or(0),
                    usage.cache_write.unwrap_or(0),
                );
                if tokens.is_empty() {
                    return None;
                }
                let key = ctx.key_for(record.id.as_deref(), None);
                let model = record.message.model.unwrap_or_else(|| "unknown".to_string());
                let mut event = RawUsageEvent::new(
                    ctx.date_of(record.timestamp.as_ref()),
                    model,
                    ctx.app,
                    RecordSource::Session,
                    tokens,
                    key,
                );
                event.provider = record
                    .message
                    .provider
                    .or_else(|| ctx.provider.map(str::to_string));
                event.reported_cost = usage.cost.and_then(|c| c.total);
                event
            }
            LogRecord::SessionResult(record) => {
                let tokens = record.usage.as_ref()?.tokens();
                if tokens.is_empty() {
                    return None;
                }
                let model = record
                    .model_usage
                    .as_ref()
                    .and_then(|m| m.keys().next().cloned())
                    .unwrap_or_else(|| "unknown".to_string());
                let key = ctx.key_for(record.session_id.as_deref(), None);
                let mut event = RawUsageEvent::new(
                    ctx.date_of(record.timestamp.as_ref()),
                    model,
                    ctx.app,
                    RecordSource::Session,
                    tokens,
                    key,
                );
                event.provider = ctx.provider.map(str::to_string);
                event.reported_cost = record.total_cost_usd;
                event
            }
            LogRecord::ChatCompletion(record) => {
                let prompt = record.usage.prompt_tokens.unwrap_or(0).max(0);
                let cached = record
                    .usage
                    .prompt_tokens_details
                    .and_then(|d| d.cached_tokens)
                    .unwrap_or(0)
                    .clamp(0, prompt);
                // prompt_tokens already includes the cached part
                let tokens = TokenCounts::new(
                    prompt - cached,
                    record.usage.completion_tokens.unwrap_or(0),
                    cached,
                    0,
                );
                if tokens.is_empty() {
                    return None;
                }
                let key = ctx.key_for(record.id.as_deref(), None);
                let date = record
                    .created
                    .and_then(unix_to_date)
                    .unwrap_or(ctx.fallback_date);
                let mut event = RawUsageEvent::new(
                    date,
                    record.model,
                    ctx.app,
                    RecordSource::Session,
                    tokens,
                    key,
                );
                event.provider = ctx.provider.map(str::to_string);
                event
            }
            LogRecord::NonUsage | LogRecord::Unrecognized => return None,
        };
        Some(event.with_provenance(ctx.path, ctx.line))
    }
}

/// RFC 3339 string or unix seconds/milliseconds, as a local calendar date.
pub fn timestamp_to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Local).date_naive()),
        Value::Number(n) => n.as_i64().and_then(unix_to_date),
        _ => None,
    }
}

fn unix_to_date(secs_or_millis: i64) -> Option<NaiveDate> {
    // Anything past year 33658 in seconds is really milliseconds
    let secs = if secs_or_millis > 1_000_000_000_000 {
        secs_or_millis / 1000
    } else {
        secs_or_millis
    };
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.with_timezone(&Local).date_naive())
}

fn modified_date(path: &Path) -> std::io::Result<NaiveDate> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified).date_naive())
}

// ============================================================================
// Scanner
// ============================================================================

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    modified: NaiveDate,
    unrecognized: usize,
}

/// Lazy iterator over the usage events of a set of log sources.
///
/// Files are discovered and opened one at a time. Counters are available
/// through [`LogScanner::stats`] once iteration has finished.
pub struct LogScanner {
    sources: std::vec::IntoIter<LogSource>,
    range: Option<DateRange>,
    source: Option<LogSource>,
    files: Option<walkdir::IntoIter>,
    current: Option<OpenFile>,
    stats: ScanStats,
}

impl LogScanner {
    /// Scan `sources`, keeping events dated inside `range` (all when `None`).
    pub fn new(sources: Vec<LogSource>, range: Option<DateRange>) -> Self {
        Self {
            sources: sources.into_iter(),
            range,
            source: None,
            files: None,
            current: None,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Move to the next source with an existing root.
    fn next_source(&mut self) -> bool {
        for source in self.sources.by_ref() {
            if !source.root.is_dir() {
                debug!(app = %source.app, root = %source.root.display(), "log source not present");
                continue;
            }
            debug!(app = %source.app, root = %source.root.display(), "scanning log source");
            self.files = Some(
                WalkDir::new(&source.root)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter(),
            );
            self.source = Some(source);
            return true;
        }
        self.source = None;
        self.files = None;
        false
    }

    /// Open the next matching file of the current source.
    fn next_file(&mut self) -> Option<OpenFile> {
        let source = self.source.as_ref()?;
        let files = self.files.as_mut()?;
        for entry in files.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.stats.files_failed += 1;
                    debug!(error = %e, "failed to walk log directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !source.matches(entry.path()) {
                continue;
            }
            let path = entry.into_path();
            let modified = match modified_date(&path) {
                Ok(date) => date,
                Err(e) => {
                    self.stats.files_failed += 1;
                    warn!(file = %path.display(), error = %e, "failed to stat log file");
                    continue;
                }
            };
            if let Some(range) = &self.range
                && modified < range.start()
            {
                self.stats.files_skipped += 1;
                trace!(file = %path.display(), %modified, "log file older than window");
                continue;
            }
            match File::open(&path) {
                Ok(file) => {
                    self.stats.files_scanned += 1;
                    return Some(OpenFile {
                        path,
                        lines: BufReader::new(file).lines(),
                        line_no: 0,
                        modified,
                        unrecognized: 0,
                    });
                }
                Err(e) => {
                    self.stats.files_failed += 1;
                    warn!(file = %path.display(), error = %e, "failed to open log file");
                }
            }
        }
        None
    }

    fn finish_file(&mut self, file: OpenFile) {
        if file.unrecognized > 0 {
            warn!(
                file = %file.path.display(),
                count = file.unrecognized,
                "skipped records of unrecognized shape"
            );
        }
    }
}

impl Iterator for LogScanner {
    type Item = RawUsageEvent;

    fn next(&mut self) -> Option<RawUsageEvent> {
        loop {
            if self.current.is_none() {
                if let Some(file) = self.next_file() {
                    self.current = Some(file);
                } else if !self.next_source() {
                    return None;
                }
                continue;
            }
            let Some(file) = self.current.as_mut() else {
                continue;
            };

            let line = match file.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    // Unreadable rest of file, e.g. invalid UTF-8
                    self.stats.malformed_lines += 1;
                    debug!(file = %file.path.display(), error = %e, "failed to read line");
                    if let Some(file) = self.current.take() {
                        self.finish_file(file);
                    }
                    continue;
                }
                None => {
                    if let Some(file) = self.current.take() {
                        self.finish_file(file);
                    }
                    continue;
                }
            };
            file.line_no += 1;
            self.stats.lines_read += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = match parse_line(trimmed) {
                Ok(record) => record,
                Err(e) => {
                    self.stats.malformed_lines += 1;
                    trace!(file = %file.path.display(), line = file.line_no, error = %e, "malformed line");
                    continue;
                }
            };
            if matches!(record, LogRecord::Unrecognized) {
                self.stats.unrecognized_records += 1;
                file.unrecognized += 1;
                trace!(file = %file.path.display(), line = file.line_no, "unrecognized record");
                continue;
            }

            let Some(source) = self.source.as_ref() else {
                continue;
            };
            let ctx = LineContext {
                app: &source.app,
                provider: source.provider.as_deref(),
                path: &file.path,
                line: file.line_no,
                fallback_date: file.modified,
            };
            let Some(event) = record.into_event(&ctx) else {
                continue;
            };
            if let Some(range) = &self.range
                && !range.contains(event.date)
            {
                self.stats.out_of_window += 1;
                continue;
            }
            self.stats.events_emitted += 1;
            return Some(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ctx(path: &Path, line: usize) -> LineContext<'_> {
        LineContext {
            app: "claude-code",
            provider: None,
            path,
            line,
            fallback_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_parse_assistant_line() {
        let line = r#"{"type":"assistant","requestId":"req_1","timestamp":"2026-03-02T12:00:00Z","message":{"model":"claude-opus-4-5-20251101","id":"msg_01","type":"message","role":"assistant","content":[],"usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":200,"cache_read_input_tokens":300}}}"#;
        let record = parse_line(line).unwrap();
        assert!(matches!(record, LogRecord::AnthropicMessage(_)));

        let path = Path::new("/logs/s.jsonl");
        let event = record.into_event(&ctx(path, 7)).unwrap();
        assert_eq!(event.model, "claude-opus-4-5-20251101");
        assert_eq!(event.tokens, TokenCounts::new(100, 50, 300, 200));
        assert_eq!(
            event.identity_key,
            IdentityKey::session_message("claude-code", "msg_01", Some("req_1"))
        );
        assert_eq!(event.provenance.unwrap().line, 7);
        assert!(event.reported_cost.is_none());
    }

    #[test]
    fn test_parse_agent_message_with_cost() {
        let line = r#"{"type":"message","id":"e1","timestamp":"2026-03-02T08:00:00Z","message":{"role":"assistant","provider":"openrouter","model":"anthropic/claude-sonnet-4-5","usage":{"input":10,"output":20,"cacheRead":30,"cacheWrite":40,"totalTokens":100,"cost":{"total":0.0123}}}}"#;
        let event = parse_line(line)
            .unwrap()
            .into_event(&ctx(Path::new("/a"), 1))
            .unwrap();
        assert_eq!(event.provider.as_deref(), Some("openrouter"));
        assert_eq!(event.tokens, TokenCounts::new(10, 20, 30, 40));
        assert_eq!(event.reported_cost, Some(0.0123));

        let user = r#"{"type":"message","id":"e2","message":{"role":"user","content":"hi"}}"#;
        assert!(parse_line(user).unwrap().into_event(&ctx(Path::new("/a"), 2)).is_none());
    }

    #[test]
    fn test_parse_result_line() {
        let line = r#"{"type":"result","subtype":"success","total_cost_usd":0.3594,"usage":{"input_tokens":10549,"cache_creation_input_tokens":0,"cache_read_input_tokens":727040,"output_tokens":5509},"modelUsage":{"glm-4.7":{"inputTokens":15836,"outputTokens":5923}},"session_id":"60e69c73"}"#;
        let event = parse_line(line)
            .unwrap()
            .into_event(&ctx(Path::new("/a"), 1))
            .unwrap();
        assert_eq!(event.model, "glm-4.7");
        assert_eq!(event.reported_cost, Some(0.3594));
        assert_eq!(event.tokens.cache_read, 727_040);
        // No timestamp: falls back to the file date
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn test_parse_chat_completion() {
        let line = r#"{"id":"chatcmpl-1","object":"chat.completion","created":1767225600,"model":"gpt-4o-2024-08-06","usage":{"prompt_tokens":1000,"completion_tokens":200,"prompt_tokens_details":{"cached_tokens":400}}}"#;
        let event = parse_line(line)
            .unwrap()
            .into_event(&ctx(Path::new("/a"), 1))
            .unwrap();
        assert_eq!(event.tokens, TokenCounts::new(600, 200, 400, 0));
        assert_eq!(event.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_non_usage_and_unrecognized() {
        let system = r#"{"type":"system","subtype":"init","cwd":"/home/coder"}"#;
        assert!(matches!(parse_line(system).unwrap(), LogRecord::NonUsage));

        let odd = r#"{"kind":"telemetry","value":3}"#;
        assert!(matches!(parse_line(odd).unwrap(), LogRecord::Unrecognized));

        // Known type, broken layout
        let broken = r#"{"type":"assistant","message":"oops"}"#;
        assert!(matches!(parse_line(broken).unwrap(), LogRecord::Unrecognized));

        assert!(parse_line("not json {").is_err());
    }

    #[test]
    fn test_zero_token_records_are_skipped() {
        let line = r#"{"type":"assistant","message":{"id":"m","model":"claude-sonnet-4","usage":{"input_tokens":0,"output_tokens":0}}}"#;
        assert!(parse_line(line).unwrap().into_event(&ctx(Path::new("/a"), 1)).is_none());
    }

    #[test]
    fn test_line_key_without_id() {
        let line = r#"{"type":"assistant","message":{"model":"claude-sonnet-4","usage":{"input_tokens":5,"output_tokens":1}}}"#;
        let path = Path::new("/logs/x.jsonl");
        let event = parse_line(line).unwrap().into_event(&ctx(path, 3)).unwrap();
        assert_eq!(
            event.identity_key,
            IdentityKey::session_line("claude-code", path, 3)
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let utc_noon = Value::String("2026-03-02T12:00:00Z".to_string());
        let expected = DateTime::parse_from_rfc3339("2026-03-02T12:00:00Z")
            .unwrap()
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(timestamp_to_date(&utc_noon), Some(expected));
        assert_eq!(timestamp_to_date(&serde_json::json!(1772452800)), Some(expected));
        assert_eq!(timestamp_to_date(&serde_json::json!(1772452800000_i64)), Some(expected));
        assert_eq!(timestamp_to_date(&Value::Bool(true)), None);
    }

    #[test]
    fn test_offset_timestamps_use_the_local_calendar_day() {
        // 07:30 UTC on the 3rd, written with a -08:00 offset
        let late_evening = "2026-03-02T23:30:00-08:00";
        let expected = DateTime::parse_from_rfc3339(late_evening)
            .unwrap()
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(
            timestamp_to_date(&Value::String(late_evening.to_string())),
            Some(expected)
        );
        let as_unix = DateTime::parse_from_rfc3339(late_evening).unwrap().timestamp();
        assert_eq!(timestamp_to_date(&serde_json::json!(as_unix)), Some(expected));
    }

    #[test]
    fn test_scanner_counts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("project-a");
        std::fs::create_dir_all(&nested).unwrap();

        let mut file = File::create(nested.join("session.jsonl")).unwrap();
        writeln!(file, r#"{{"type":"user","message":{{"role":"user","content":"hi"}}}}"#).unwrap();
        writeln!(file, r#"{{"type":"assistant","timestamp":"2026-03-02T12:00:00Z","message":{{"id":"m1","model":"claude-sonnet-4","usage":{{"input_tokens":10,"output_tokens":5}}}}}}"#).unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(file, r#"{{"mystery":true}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"type":"assistant","timestamp":"2025-12-01T12:00:00Z","message":{{"id":"m0","model":"claude-sonnet-4","usage":{{"input_tokens":10,"output_tokens":5}}}}}}"#).unwrap();
        drop(file);
        std::fs::write(nested.join("notes.txt"), "ignored").unwrap();

        let source = LogSource::new("claude-code", dir.path());
        let today = Local::now().date_naive();
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let range = DateRange::new(start.min(today), today.max(start)).unwrap();

        let mut scanner = LogScanner::new(vec![source], Some(range));
        let events: Vec<_> = scanner.by_ref().collect();
        let stats = scanner.stats();

        assert_eq!(stats.files_scanned, 1);
        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.unrecognized_records, 1);
        assert_eq!(stats.out_of_window, 1);
        assert_eq!(stats.events_emitted, events.len());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].app, "claude-code");
    }

    #[test]
    fn test_scanner_skips_missing_roots() {
        let mut scanner = LogScanner::new(
            vec![LogSource::new("ghost", "/nonexistent/costmon/logs")],
            None,
        );
        assert!(scanner.next().is_none());
        assert_eq!(scanner.stats(), &ScanStats::default());
    }

    #[test]
    fn test_source_from_config() {
        let config = SourceConfig {
            app: "my-agent".to_string(),
            root: PathBuf::from("/var/log/agent"),
            extension: ".log".to_string(),
            provider: Some("deepseek".to_string()),
        };
        let source = LogSource::from_config(&config).unwrap();
        assert_eq!(source.extension, "log");
        assert!(source.matches(Path::new("/var/log/agent/a.LOG")));
        assert!(!source.matches(Path::new("/var/log/agent/a.jsonl")));
        assert_eq!(source.provider.as_deref(), Some("deepseek"));
    }
}
