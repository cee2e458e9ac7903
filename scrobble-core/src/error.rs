use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrobbleError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Adapter/fetch errors
    #[error("Fetch from source {source} failed: {reason}")]
    Fetch { source: String, reason: String },

    #[error("Record from source {source} is invalid: {reason}")]
    InvalidRecord { source: String, reason: String },

    // Dispatcher errors
    #[error("Dispatch to downstream clients failed: {reason}")]
    Dispatch { reason: String },

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScrobbleError>;
