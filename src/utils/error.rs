use thiserror::Error;

/// Result type alias for the monitoring engine
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error types for the monitoring engine
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Malformed caller input (coordinates, latencies, ratios, threshold names)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Persistence sink failures
    #[error("Persistence error: {sink}: {message}")]
    Persistence { sink: String, message: String },

    /// Metrics export failures
    #[error("Export error: {exporter}: {message}")]
    Export { exporter: String, message: String },

    /// Ephemeral cache failures
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Process resource sampling failures
    #[error("Resource sampling error: {message}")]
    Resource { message: String },

    /// Scheduler lifecycle errors
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    /// A tick stage exceeded its I/O deadline
    #[error("Timeout in {stage} after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// File system errors
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl MonitorError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<N: Into<String>, S: Into<String>>(sink: N, message: S) -> Self {
        Self::Persistence {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a new export error
    pub fn export<N: Into<String>, S: Into<String>>(exporter: N, message: S) -> Self {
        Self::Export {
            exporter: exporter.into(),
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new resource sampling error
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Create a new scheduler error
    pub fn scheduler<S: Into<String>>(message: S) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(stage: S, seconds: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            seconds,
        }
    }

    /// Check if this error is a caller contract violation
    pub fn is_input_error(&self) -> bool {
        matches!(self, MonitorError::InvalidInput { .. })
    }

    /// Check if this error comes from an external collaborator and may clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::Persistence { .. }
                | MonitorError::Export { .. }
                | MonitorError::Cache { .. }
                | MonitorError::Timeout { .. }
                | MonitorError::Http(_)
                | MonitorError::Redis(_)
                | MonitorError::Io(_)
        )
    }
}
