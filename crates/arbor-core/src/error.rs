use thiserror::Error;

/// Errors raised by the shared arbor foundations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid entity kind: {0}")]
    InvalidKind(String),
}
