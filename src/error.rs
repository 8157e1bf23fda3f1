//! Error types for engine operations

use std::fmt;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while loading definitions or talking to protocol extensions
#[derive(Debug)]
pub enum EngineError {
    /// Host configuration could not be used
    InvalidConfig(String),

    /// Connector definition is malformed
    InvalidConnector(String),

    /// No registered extension handles this source or criterion variant
    UnsupportedSource(String),

    /// A protocol extension reported a failure
    Protocol(String),

    /// I/O error (file access, etc.)
    Io(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidConfig(msg) => write!(f, "invalid host configuration: {}", msg),
            EngineError::InvalidConnector(msg) => write!(f, "invalid connector: {}", msg),
            EngineError::UnsupportedSource(msg) => {
                write!(f, "no protocol extension supports {}", msg)
            }
            EngineError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            EngineError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidConnector(err.to_string())
    }
}
