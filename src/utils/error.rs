use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    /// 來源抓取或解析失敗，可恢復，只影響該來源
    #[error("Adapter fetch failed for '{source_id}': {message}")]
    AdapterFetchError { source_id: String, message: String },

    #[error("Unknown outlet: {outlet}")]
    UnknownOutletError { outlet: String },

    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    #[error("Signal {source_identifier} exceeded retry ceiling ({retry_count} > {ceiling})")]
    RetryCeilingExceeded {
        source_identifier: String,
        retry_count: u32,
        ceiling: u32,
    },

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Unauthorized caller: {message}")]
    Unauthorized { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Source,
    Storage,
    Configuration,
    Data,
    Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl HarvestError {
    pub fn adapter(source_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::AdapterFetchError {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    pub fn persistence(message: impl std::fmt::Display) -> Self {
        Self::PersistenceError {
            message: message.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::Timeout { .. } => ErrorCategory::Network,
            Self::AdapterFetchError { .. } | Self::UnknownOutletError { .. } => {
                ErrorCategory::Source
            }
            Self::IoError(_) | Self::PersistenceError { .. } => ErrorCategory::Storage,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::SerializationError(_)
            | Self::CsvError(_)
            | Self::ValidationError { .. }
            | Self::RetryCeilingExceeded { .. } => ErrorCategory::Data,
            Self::Unauthorized { .. } => ErrorCategory::Access,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RetryCeilingExceeded { .. } => ErrorSeverity::Low,
            Self::HttpError(_)
            | Self::Timeout { .. }
            | Self::AdapterFetchError { .. }
            | Self::PersistenceError { .. } => ErrorSeverity::Medium,
            Self::UnknownOutletError { .. }
            | Self::SerializationError(_)
            | Self::CsvError(_)
            | Self::ValidationError { .. }
            | Self::Unauthorized { .. } => ErrorSeverity::High,
            Self::IoError(_)
            | Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 是否值得在下一次排程重試
    pub fn is_retryable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Medium)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::HttpError(_) | Self::Timeout { .. } => {
                "Check network connectivity or raise the timeout for this source"
            }
            Self::AdapterFetchError { .. } => {
                "The source will be retried on the next pass; verify the feed URL if it keeps failing"
            }
            Self::UnknownOutletError { .. } => "Use one of the outlets listed in the [[outlets]] config",
            Self::PersistenceError { .. } | Self::IoError(_) => {
                "Check that the storage location exists and is writable"
            }
            Self::RetryCeilingExceeded { .. } => {
                "Inspect the signal's URLs and retry it manually with enrich-one"
            }
            Self::Unauthorized { .. } => "Send the configured caller secret as a Bearer token",
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Fix the configuration file and run again",
            Self::SerializationError(_) | Self::CsvError(_) | Self::ValidationError { .. } => {
                "The data did not match the expected shape; check the source output"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Source => format!("Source problem: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Access => format!("Access denied: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
