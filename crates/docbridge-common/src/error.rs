//! Error types for docbridge

use thiserror::Error;

/// Result type alias for docbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// MongoDB server code for a duplicate key violation
#[cfg(feature = "mongodb-errors")]
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Unified error type for all docbridge operations
///
/// A lifecycle hook declining an operation is not represented here: vetoed
/// saves, inserts and deletes return `Ok(false)`.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Malformed or unsupported query constraint, raised before any store call
    #[error("Constraint error: {0}")]
    Constraint(String),

    /// Transport, pool or server-selection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Data-level failure reported by the store
    #[error("Store error: {0}")]
    Store(String),

    /// Duplicate key on insert or upsert
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value cannot be coerced to its declared type
    #[error("Hydration error: {0}")]
    Hydration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns true if the failure happened in the transport layer
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BridgeError::Connection(_))
    }

    /// Returns true if the store rejected the data itself
    pub fn is_data_error(&self) -> bool {
        matches!(self, BridgeError::Store(_) | BridgeError::Conflict(_))
    }

    /// Returns true if the error was raised before reaching the store
    pub fn is_constraint_error(&self) -> bool {
        matches!(self, BridgeError::Constraint(_))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for BridgeError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        match err.kind.as_ref() {
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. } => BridgeError::Connection(err.to_string()),
            ErrorKind::Write(WriteFailure::WriteError(write_err))
                if write_err.code == DUPLICATE_KEY_CODE =>
            {
                BridgeError::Conflict(err.to_string())
            }
            ErrorKind::Command(cmd_err) if cmd_err.code == DUPLICATE_KEY_CODE => {
                BridgeError::Conflict(err.to_string())
            }
            ErrorKind::InvalidArgument { .. } => BridgeError::Constraint(err.to_string()),
            ErrorKind::BsonSerialization(_) => BridgeError::Serialization(err.to_string()),
            ErrorKind::BsonDeserialization(_) => BridgeError::Deserialization(err.to_string()),
            _ => BridgeError::Store(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for BridgeError {
    fn from(err: bson::ser::Error) -> Self {
        BridgeError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for BridgeError {
    fn from(err: bson::de::Error) -> Self {
        BridgeError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
