use thiserror::Error;

/// Errors that can occur while setting up or operating instrumentation.
///
/// None of these ever reach the wrapped engine's caller; they surface in
/// logs and in the return values of setup functions only.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize instrumentation: {0}")]
    Initialization(String),

    #[error("Failed to export spans: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Instrumentation already initialized")]
    AlreadyInitialized,
}

/// Result type for instrumentation operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        TelemetryError::Config(err.to_string())
    }
}
