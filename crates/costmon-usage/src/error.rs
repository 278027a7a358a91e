//! Error types for usage ingestion, storage and reporting.

use chrono::NaiveDate;
use thiserror::Error;

/// Usage tracking errors.
#[derive(Error, Debug)]
pub enum UsageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database locked error (retryable)
    #[error("database is locked (retry {retry_count}/{max_retries}): {message}")]
    DatabaseLocked {
        /// Retry attempt number
        retry_count: u32,
        /// Maximum retries allowed
        max_retries: u32,
        /// Human-readable message
        message: String,
    },

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error (pricing overrides)
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (file reading, database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Date range with end before start
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange {
        /// Requested start date
        start: NaiveDate,
        /// Requested end date
        end: NaiveDate,
    },

    /// Date string that is not `YYYY-MM-DD`
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// A configuration value required by this operation is absent
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// Configuration value out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// Pricing table problem (duplicate or negative rates in an override file)
    #[error("pricing error: {0}")]
    Pricing(String),

    /// Schema migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// Query error (connection lock poisoned)
    #[error("query error: {0}")]
    Query(String),

    /// HTTP transport error talking to a provider usage API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider usage API returned a non-success status
    #[error("{provider} API error: {status} - {body}")]
    Api {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Report template error
    #[error("template error: {0}")]
    Template(String),

    /// Core error (paths, directories)
    #[error(transparent)]
    Core(#[from] costmon_core::MonitorError),
}

impl UsageError {
    /// Check if this error is retryable (e.g., database locked).
    pub fn is_retryable(&self) -> bool {
        self.is_database_locked()
    }

    /// Check if this error indicates a database lock.
    pub fn is_database_locked(&self) -> bool {
        match self {
            UsageError::DatabaseLocked { .. } => true,
            UsageError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }

    /// True for failures of the storage layer, which are fatal to a run.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            UsageError::Database(_)
                | UsageError::DatabaseLocked { .. }
                | UsageError::Io(_)
                | UsageError::Migration(_)
                | UsageError::Query(_)
        )
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            UsageError::DatabaseLocked { .. } => {
                Some("Another costmon run is writing the database; try again shortly")
            }
            UsageError::ConfigMissing(_) => {
                Some("Add the value to ~/.llm-cost-monitor/config.yaml or pass it on the command line")
            }
            UsageError::Pricing(_) => Some("Fix the rows in the file named by pricing_file"),
            UsageError::InvalidRange { .. } | UsageError::InvalidDate(_) => {
                Some("Dates are YYYY-MM-DD and --from must not be after --to")
            }
            UsageError::Api { status: 401 | 403, .. } => {
                Some("Check the API keys under providers in the config file")
            }
            UsageError::Core(e) => e.guidance(),
            _ => None,
        }
    }
}

/// Result type for usage operations.
pub type Result<T> = std::result::Result<T, UsageError>;

/// Helper to check if a UsageError is a database lock error.
pub fn is_database_locked_error(e: &UsageError) -> bool {
    e.is_database_locked()
}
