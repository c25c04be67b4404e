//! Event log error types

use thiserror::Error;

use crate::events::registry::RegistryError;

#[derive(Error, Debug)]
pub enum EventLogError {
    /// The underlying store failed. The envelope was not persisted and no
    /// subscriber was dispatched; the caller must treat the business write
    /// as failed.
    #[error("event log storage error: {0}")]
    Storage(String),

    #[error("envelope serialization error: {0}")]
    Serialization(String),

    /// The envelope was refused at emission (unknown type or wrong payload
    /// shape).
    #[error(transparent)]
    Emission(#[from] RegistryError),
}

impl EventLogError {
    /// Get the error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EventLogError::Storage(_) => "EVENT_LOG_STORAGE",
            EventLogError::Serialization(_) => "EVENT_SERIALIZATION",
            EventLogError::Emission(RegistryError::UnknownType(_)) => "UNKNOWN_EVENT_TYPE",
            EventLogError::Emission(RegistryError::PayloadShape { .. }) => "INVALID_EVENT_PAYLOAD",
        }
    }
}

impl From<sqlx::Error> for EventLogError {
    fn from(e: sqlx::Error) -> Self {
        EventLogError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}
