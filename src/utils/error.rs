use thiserror::Error;

/// Failures reported by the remote record store or object store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("authentication rejected: {0}")]
    Unauthorized(String),

    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("request rejected as invalid: {0}")]
    Validation(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("remote service error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Maps a non-success HTTP status and its body onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => StoreError::Unauthorized(body),
            403 => StoreError::Forbidden(body),
            404 => StoreError::NotFound(body),
            409 => StoreError::AlreadyExists(body),
            400 | 422 => StoreError::Validation(body),
            429 => StoreError::RateLimited { attempts: 1 },
            _ => StoreError::Server { status, body },
        }
    }

    /// Rejections tied to the content of a single request. Everything else
    /// means the pipeline itself can no longer be trusted.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            StoreError::Unauthorized(_)
                | StoreError::Forbidden(_)
                | StoreError::NotFound(_)
                | StoreError::Validation(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AirliftError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Ingestion error: {message}")]
    IngestionError { message: String },

    #[error("Duplicate columns found in {source_name}: {}", .columns.join(", "))]
    DuplicateColumnsError {
        source_name: String,
        columns: Vec<String>,
    },

    #[error("Cannot convert '{value}' in column '{column}' (row {row}) to {kind}")]
    ConversionError {
        column: String,
        row: usize,
        value: String,
        kind: String,
    },

    #[error("Remote store error: {0}")]
    RemoteError(#[from] StoreError),

    #[error("Upload halted after {completed} of {total} records: {reason}")]
    UploadHalted {
        completed: usize,
        total: usize,
        reason: String,
    },

    #[error("Credential error: {message}")]
    CredentialError { message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AirliftError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Ingestion,
    Schema,
    Upload,
    Network,
    Credentials,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AirliftError {
    pub fn config(message: impl Into<String>) -> Self {
        AirliftError::ConfigError {
            message: message.into(),
        }
    }

    pub fn ingestion(message: impl Into<String>) -> Self {
        AirliftError::IngestionError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AirliftError::ConfigError { .. }
            | AirliftError::InvalidConfigValueError { .. }
            | AirliftError::MissingConfigError { .. } => ErrorCategory::Configuration,
            AirliftError::IngestionError { .. }
            | AirliftError::DuplicateColumnsError { .. }
            | AirliftError::ConversionError { .. }
            | AirliftError::CsvError(_)
            | AirliftError::SerializationError(_) => ErrorCategory::Ingestion,
            AirliftError::RemoteError(StoreError::Transport(_))
            | AirliftError::RemoteError(StoreError::RateLimited { .. }) => ErrorCategory::Network,
            AirliftError::RemoteError(_) => ErrorCategory::Schema,
            AirliftError::UploadHalted { .. } => ErrorCategory::Upload,
            AirliftError::CredentialError { .. } => ErrorCategory::Credentials,
            AirliftError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Configuration
            | ErrorCategory::Ingestion
            | ErrorCategory::Schema
            | ErrorCategory::Credentials => ErrorSeverity::High,
            ErrorCategory::Upload | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// Process exit code for a fatal error surfaced at the top level.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            AirliftError::DuplicateColumnsError { columns, .. } => {
                format!("The input file repeats these column names: {}", columns.join(", "))
            }
            AirliftError::RemoteError(StoreError::Unauthorized(_)) => {
                "Airtable rejected the token".to_string()
            }
            AirliftError::RemoteError(StoreError::Forbidden(_)) => {
                "The token has no access to this base or table".to_string()
            }
            AirliftError::UploadHalted {
                completed, total, ..
            } => format!(
                "The upload stopped early: {} of {} records were processed",
                completed, total
            ),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the command line options and the run file",
            ErrorCategory::Ingestion => "Fix the input file and run again",
            ErrorCategory::Schema => "Check the table's fields and the token's scopes",
            ErrorCategory::Upload => {
                "Inspect the log for the first systemic failure; records already uploaded are not rolled back"
            }
            ErrorCategory::Network => "Check connectivity and retry later",
            ErrorCategory::Credentials => "Re-run with --dropbox-refresh-token to authorize again",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}
