//! Run lifecycle error types

use thiserror::Error;
use uuid::Uuid;

use super::types::RunStatus;

#[derive(Error, Debug, Clone)]
pub enum RunError {
    // === Validation ===
    #[error("invalid run spec: {0}")]
    Validation(String),

    // === Lookup ===
    #[error("run not found: {0}")]
    NotFound(Uuid),

    // === State machine ===
    #[error("illegal run transition for {run_id}: {from} -> {to}")]
    IllegalTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("run {run_id} is not startable (status {status})")]
    NotStartable { run_id: Uuid, status: RunStatus },

    // === Dependencies ===
    #[error("strategy load failed: {0}")]
    Strategy(String),

    #[error("no exchange credentials configured for {0} mode")]
    MissingCredentials(String),

    #[error("no bars available for {symbol} {timeframe} in the requested window")]
    NoData { symbol: String, timeframe: String },

    // === System ===
    #[error("storage error: {0}")]
    Storage(String),

    #[error("event log error: {0}")]
    EventLog(String),

    #[error("run {run_id} failed: {message}")]
    Failed { run_id: Uuid, message: String },
}

impl RunError {
    /// Get the error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Validation(_) => "INVALID_RUN_SPEC",
            RunError::NotFound(_) => "RUN_NOT_FOUND",
            RunError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            RunError::NotStartable { .. } => "RUN_NOT_STARTABLE",
            RunError::Strategy(_) => "STRATEGY_LOAD_FAILED",
            RunError::MissingCredentials(_) => "MISSING_CREDENTIALS",
            RunError::NoData { .. } => "NO_DATA",
            RunError::Storage(_) => "STORAGE_ERROR",
            RunError::EventLog(_) => "EVENT_LOG_ERROR",
            RunError::Failed { .. } => "RUN_FAILED",
        }
    }

    /// Get HTTP status code suggestion.
    pub fn http_status(&self) -> u16 {
        match self {
            RunError::Validation(_) => 400,
            RunError::NotFound(_) => 404,
            RunError::IllegalTransition { .. } | RunError::NotStartable { .. } => 409,
            RunError::Strategy(_) | RunError::MissingCredentials(_) | RunError::NoData { .. } => 422,
            RunError::Storage(_) | RunError::EventLog(_) | RunError::Failed { .. } => 500,
        }
    }
}

impl From<crate::persistence::StoreError> for RunError {
    fn from(e: crate::persistence::StoreError) -> Self {
        RunError::Storage(e.to_string())
    }
}

impl From<crate::event_log::EventLogError> for RunError {
    fn from(e: crate::event_log::EventLogError) -> Self {
        RunError::EventLog(e.to_string())
    }
}

impl From<crate::strategy::LoaderError> for RunError {
    fn from(e: crate::strategy::LoaderError) -> Self {
        RunError::Strategy(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_status() {
        assert_eq!(RunError::Validation("x".into()).code(), "INVALID_RUN_SPEC");
        assert_eq!(RunError::Validation("x".into()).http_status(), 400);
        assert_eq!(RunError::NotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(
            RunError::NotStartable {
                run_id: Uuid::nil(),
                status: RunStatus::Running,
            }
            .http_status(),
            409
        );
    }
}
