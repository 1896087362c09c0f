//! Error types for the core library

use thiserror::Error;

/// Core error type for cibox operations
#[derive(Error, Debug)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

/// Result type alias for cibox operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = Error::config("At least one step must be declared");
        assert_eq!(err.to_string(), "Configuration error: At least one step must be declared");
    }
}
