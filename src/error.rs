use thiserror::Error;

/// Supervisor fault raised by `startProcess` when the process is already up
pub const FAULT_ALREADY_STARTED: i64 = 60;

/// Supervisor fault raised by `stopProcess` when the process is not running
pub const FAULT_NOT_RUNNING: i64 = 70;

/// Main error type for the memory watchdog
#[derive(Debug, Error)]
pub enum MemmonError {
    // Configuration errors
    #[error("Unparseable byte size: {0}")]
    InvalidSize(String),

    #[error("Unparseable duration: {0}")]
    InvalidDuration(String),

    #[error("Unparseable threshold: {0}")]
    InvalidThreshold(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    // Listener protocol errors
    #[error("Listener protocol error: {0}")]
    ProtocolError(String),

    // Supervisor control channel errors
    #[error("Failed to connect to supervisor: {0}")]
    ConnectionError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("XML-RPC error: {0}")]
    XmlRpcError(String),

    #[error("Supervisor fault {code}: {message}")]
    RpcFault { code: i64, message: String },

    // Measurement errors
    #[error("Measurement failed: {0}")]
    MeasurementError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemmonError {
    /// Whether this error is a supervisor fault with the given code
    pub fn is_fault(&self, fault_code: i64) -> bool {
        matches!(self, MemmonError::RpcFault { code, .. } if *code == fault_code)
    }

    /// Whether this error was raised while parsing configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MemmonError::InvalidSize(_)
                | MemmonError::InvalidDuration(_)
                | MemmonError::InvalidThreshold(_)
                | MemmonError::ConfigError(_)
                | MemmonError::InvalidConfig(_)
        )
    }
}

/// Result type alias for watchdog operations
pub type Result<T> = std::result::Result<T, MemmonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fault() {
        let err = MemmonError::RpcFault {
            code: FAULT_NOT_RUNNING,
            message: "NOT_RUNNING: foo".to_string(),
        };
        assert!(err.is_fault(FAULT_NOT_RUNNING));
        assert!(!err.is_fault(FAULT_ALREADY_STARTED));
        assert!(!MemmonError::HttpError("500".to_string()).is_fault(FAULT_NOT_RUNNING));
    }

    #[test]
    fn test_is_config_error() {
        assert!(MemmonError::InvalidSize("x".to_string()).is_config_error());
        assert!(!MemmonError::ProtocolError("x".to_string()).is_config_error());
    }

    #[test]
    fn test_fault_display() {
        let err = MemmonError::RpcFault {
            code: 10,
            message: "BAD_NAME: foo".to_string(),
        };
        assert_eq!(err.to_string(), "Supervisor fault 10: BAD_NAME: foo");
    }
}
