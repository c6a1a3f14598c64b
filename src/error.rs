//! Error types for synchronization runs

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Matches the backend message raised when a filter expression grows past what
/// the query engine can compile.
static COMPLEXITY_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)expression services limit has been reached|too many parameters|stack depth limit exceeded")
        .expect("complexity limit pattern is valid")
});

/// Errors raised by source/target adapters and query adapters
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Database driver or statement error
    #[error("Database error: {0}")]
    Database(String),

    /// HTTP transport or status error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Schema could not be read or does not match
    #[error("Schema error: {0}")]
    Schema(String),

    /// The backend rejected a query because it is too complex
    #[error("Query complexity limit reached: {0}")]
    ComplexityLimit(String),

    /// Operation not supported by this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A query object cannot be rendered for this backend
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Build a database error, promoting complexity failures to their own variant.
    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        if COMPLEXITY_LIMIT.is_match(&message) {
            AdapterError::ComplexityLimit(message)
        } else {
            AdapterError::Database(message)
        }
    }

    /// Whether the backend gave up because the query expression is too large
    pub fn is_complexity_limit(&self) -> bool {
        match self {
            AdapterError::ComplexityLimit(_) => true,
            AdapterError::Database(msg) => COMPLEXITY_LIMIT.is_match(msg),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for AdapterError {
    fn from(err: duckdb::Error) -> Self {
        AdapterError::database(err.to_string())
    }
}

#[cfg(feature = "api-backend")]
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Http(err.to_string())
    }
}

/// Errors that end or degrade a synchronization run
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid import configuration for the selected mode
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend call failed
    #[error("{table}: {phase} failed: {source}")]
    Backend {
        table: String,
        phase: String,
        #[source]
        source: AdapterError,
    },

    /// A correction step made no progress and would loop forever
    #[error("{table}: invariant violated: {message}")]
    InvariantViolation { table: String, message: String },

    /// Target schema could not be created
    #[error("{table}: schema creation failed: {message}")]
    Schema { table: String, message: String },

    /// Runtime orchestration error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    /// Wrap an adapter error with the table and phase it happened in
    pub fn backend(table: impl Into<String>, phase: impl Into<String>, source: AdapterError) -> Self {
        SyncError::Backend {
            table: table.into(),
            phase: phase.into(),
            source,
        }
    }

    /// Create an invariant violation error
    pub fn invariant(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::InvariantViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the run could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Backend { source, .. } => !matches!(source, AdapterError::Unsupported(_)),
            SyncError::Io(_) | SyncError::Runtime(_) => true,
            _ => false,
        }
    }

    /// The backend complexity failure, if this error wraps one
    pub fn is_complexity_limit(&self) -> bool {
        matches!(self, SyncError::Backend { source, .. } if source.is_complexity_limit())
    }

    /// Get a user-friendly error message for log output
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Config(msg) => {
                format!("Configuration error: {msg}\n\nHint: Check the id and date field names of the import.")
            }
            SyncError::Backend {
                table,
                phase,
                source,
            } => {
                format!(
                    "{table}: {phase} failed: {source}\n\n\
                    Hint: Check connectivity and command timeouts of the source and target."
                )
            }
            SyncError::InvariantViolation { table, message } => {
                format!(
                    "{table}: {message}\n\n\
                    Hint: Source and target changed during correction. Run the import again or flush the table."
                )
            }
            SyncError::Schema { table, message } => {
                format!("{table}: {message}\n\nHint: Recreate the target table.")
            }
            _ => self.to_string(),
        }
    }
}

/// Extension used to attach table/phase context to adapter results
pub trait AdapterResultExt<T> {
    /// Wrap the error as [`SyncError::Backend`]
    fn context(self, table: &str, phase: &str) -> SyncResult<T>;
}

impl<T> AdapterResultExt<T> for Result<T, AdapterError> {
    fn context(self, table: &str, phase: &str) -> SyncResult<T> {
        self.map_err(|source| SyncError::backend(table, phase, source))
    }
}
