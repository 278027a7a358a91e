//! # costmon-config
//!
//! YAML configuration for costmon. Every section is optional: a missing file
//! or a missing section falls back to defaults, so log-based operation works
//! with no configuration at all.
//!
//! ```yaml
//! storage:
//!   path: ~/.llm-cost-monitor
//! budget:
//!   monthly_limit: 100.0
//!   alert_threshold: 0.8
//!   mode: strict
//!   notify_channels: [feishu, telegram]
//! providers:
//!   openai:
//!     keys: [sk-...]
//!   anthropic:
//!     keys: [sk-ant-admin...]
//!     organization_id: org-123
//! sources:
//!   - app: my-agent
//!     root: ~/agent-logs
//! pricing_file: ~/.llm-cost-monitor/pricing.yaml
//! ```

use std::path::{Path, PathBuf};

use costmon_core::{MonitorError, Result, paths};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the usage database lives
    #[serde(default)]
    pub storage: StorageConfig,

    /// Budget ceiling and alerting
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Provider usage API credentials
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Extra session log sources, scanned alongside the built-in ones
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Skip the built-in sources (Claude Code, OpenClaw) when false
    #[serde(default = "default_true")]
    pub include_default_sources: bool,

    /// Optional YAML file with pricing rows that override the built-in table
    #[serde(default)]
    pub pricing_file: Option<PathBuf>,

    /// File this config was loaded from, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            budget: BudgetConfig::default(),
            providers: ProvidersConfig::default(),
            sources: Vec::new(),
            include_default_sources: true,
            pricing_file: None,
            loaded_from: None,
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State directory holding `usage.db`
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// How an exceeded budget is signalled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Exceeded budget is a failure the caller should act on
    #[default]
    Strict,
    /// Exceeded budget is only logged
    Warn,
}

impl BudgetMode {
    /// Parse a mode name (`strict`/`exit` or `warn`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "exit" => Some(Self::Strict),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }

    /// Name used in config and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Warn => "warn",
        }
    }
}

/// Budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Monthly spending ceiling in USD
    #[serde(default)]
    pub monthly_limit: Option<f64>,

    /// Fraction of the ceiling at which a warning is raised
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Strict or warn-only
    #[serde(default)]
    pub mode: BudgetMode,

    /// Channels an external notifier should deliver alerts to
    #[serde(default)]
    pub notify_channels: Vec<String>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit: None,
            alert_threshold: default_alert_threshold(),
            mode: BudgetMode::default(),
            notify_channels: Vec::new(),
        }
    }
}

/// Provider API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub anthropic: AnthropicConfig,
}

impl ProvidersConfig {
    /// True when at least one provider has keys to query with.
    pub fn has_credentials(&self) -> bool {
        self.openai.keys.iter().any(|k| !k.is_empty()) || self.anthropic.is_usable()
    }
}

/// OpenAI usage API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub keys: Vec<String>,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            base_url: default_openai_base_url(),
        }
    }
}

/// Anthropic organization usage API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub keys: Vec<String>,

    #[serde(default)]
    pub organization_id: Option<String>,

    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

impl AnthropicConfig {
    /// Keys are only usable together with an organization id.
    pub fn is_usable(&self) -> bool {
        self.keys.iter().any(|k| !k.is_empty())
            && self
                .organization_id
                .as_deref()
                .is_some_and(|org| !org.is_empty())
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            organization_id: None,
            base_url: default_anthropic_base_url(),
        }
    }
}

/// An extra directory of JSON-lines session logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// App tag stored on every record from this source
    pub app: String,

    /// Directory scanned recursively
    pub root: PathBuf,

    /// File extension to pick up
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Provider to assume when records do not name one
    #[serde(default)]
    pub provider: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~").join(paths::STATE_DIR_NAME)
}

fn default_alert_threshold() -> f64 {
    0.8
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_extension() -> String {
    "jsonl".to_string()
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `./config/config.yaml` and
    /// then `~/.llm-cost-monitor/config.yaml` are tried; if neither exists the
    /// defaults are returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(MonitorError::config_not_found(path));
            }
            return Self::from_file(path);
        }

        for candidate in Self::search_paths()? {
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
            debug!(path = %candidate.display(), "config candidate not present");
        }

        debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Candidate config locations, in search order.
    pub fn search_paths() -> Result<Vec<PathBuf>> {
        Ok(vec![
            PathBuf::from("config").join(paths::CONFIG_FILE),
            paths::default_config_file()?,
        ])
    }

    /// Load and validate a specific config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MonitorError::config_not_found_with_source(path, e),
            _ => MonitorError::io("reading config", path, e),
        })?;
        let mut config = Self::parse(&contents, path)?;
        config.loaded_from = Some(path.to_path_buf());
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::parse(yaml, Path::new("<inline>"))
    }

    fn parse(yaml: &str, origin: &Path) -> Result<Self> {
        // An empty file deserializes to unit, not to a mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| MonitorError::config_invalid(origin, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.budget.alert_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MonitorError::config_validation(format!(
                "budget.alert_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if let Some(limit) = self.budget.monthly_limit
            && !(limit > 0.0 && limit.is_finite())
        {
            return Err(MonitorError::config_validation(format!(
                "budget.monthly_limit must be a positive number, got {limit}"
            )));
        }
        for source in &self.sources {
            if source.app.trim().is_empty() {
                return Err(MonitorError::config_validation(
                    "sources[].app must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// State directory with `~` expanded.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        paths::expand_tilde(&self.storage.path)
    }

    /// Full path of the usage database.
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.storage_dir()?.join(paths::DATABASE_FILE))
    }

    /// Pricing override file with `~` expanded.
    pub fn pricing_file(&self) -> Result<Option<PathBuf>> {
        self.pricing_file
            .as_ref()
            .map(paths::expand_tilde)
            .transpose()
    }

    /// Override the storage directory.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.path = path.into();
        self
    }

    /// Override the monthly budget ceiling.
    pub fn with_monthly_limit(mut self, limit: f64) -> Self {
        self.budget.monthly_limit = Some(limit);
        self
    }
}
