use std::fmt;

/// Failures surfaced by the machine communication layer.
///
/// `Connection` errors are handled by the dispatcher (reconnect and retry)
/// and only reach callers of synchronous helpers such as the SPS functions.
/// `ProtocolEncoding` marks an instruction no address table can express and
/// is treated as a programming error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpsError {
    Connection { endpoint: String, message: String },
    ProtocolEncoding { message: String },
    InvalidArgument { message: String },
    Bounds { index: usize, limit: usize },
    Timeout { operation: String, waited_ms: u64 },
}

impl MpsError {
    pub fn connection(endpoint: impl Into<String>, message: impl fmt::Display) -> Self {
        MpsError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        MpsError::ProtocolEncoding {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        MpsError::InvalidArgument {
            message: message.into(),
        }
    }
}

impl fmt::Display for MpsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpsError::Connection { endpoint, message } => {
                write!(f, "connection to {endpoint} failed: {message}")
            }
            MpsError::ProtocolEncoding { message } => write!(f, "cannot encode: {message}"),
            MpsError::InvalidArgument { message } => write!(f, "invalid argument: {message}"),
            MpsError::Bounds { index, limit } => {
                write!(f, "machine index {index} out of range (limit {limit})")
            }
            MpsError::Timeout {
                operation,
                waited_ms,
            } => write!(f, "{operation} timed out after {waited_ms} ms"),
        }
    }
}

impl std::error::Error for MpsError {}
