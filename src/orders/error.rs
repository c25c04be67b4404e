//! Order lifecycle error types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::state::OrderStatus;

#[derive(Error, Debug, Clone)]
pub enum OrderError {
    // === Validation ===
    #[error("invalid order intent: {0}")]
    Validation(String),

    // === Lookup ===
    #[error("order not found: {0}")]
    NotFound(Uuid),

    // === State machine ===
    #[error("illegal order transition for {order_id}: {from} -> {to}")]
    IllegalTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("fill would exceed order quantity for {order_id}: {filled} > {quantity}")]
    Overfill {
        order_id: Uuid,
        filled: Decimal,
        quantity: Decimal,
    },

    #[error("duplicate fill {fill_id} for order {order_id}")]
    DuplicateFill { order_id: Uuid, fill_id: String },

    // === Routing ===
    #[error("no exchange adapter registered for run {0}")]
    NoAdapter(Uuid),

    // === External ===
    /// Adapter failure that may succeed on retry. The order stays in
    /// SUBMITTING and the same client_order_id resumes the submission.
    #[error("adapter unavailable after retries: {0}")]
    AdapterUnavailable(String),

    /// The exchange refused a synchronous operation (e.g. a cancel).
    #[error("adapter rejected the operation: {0}")]
    AdapterRejected(String),

    // === System ===
    #[error("storage error: {0}")]
    Storage(String),

    #[error("event log error: {0}")]
    EventLog(String),
}

impl OrderError {
    /// Get the error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "INVALID_ORDER",
            OrderError::NotFound(_) => "ORDER_NOT_FOUND",
            OrderError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            OrderError::Overfill { .. } => "OVERFILL",
            OrderError::DuplicateFill { .. } => "DUPLICATE_FILL",
            OrderError::NoAdapter(_) => "NO_ADAPTER",
            OrderError::AdapterUnavailable(_) => "ADAPTER_UNAVAILABLE",
            OrderError::AdapterRejected(_) => "ADAPTER_REJECTED",
            OrderError::Storage(_) => "STORAGE_ERROR",
            OrderError::EventLog(_) => "EVENT_LOG_ERROR",
        }
    }

    /// Get HTTP status code suggestion.
    pub fn http_status(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 400,
            OrderError::NotFound(_) => 404,
            OrderError::IllegalTransition { .. } => 409,
            OrderError::Overfill { .. } | OrderError::DuplicateFill { .. } => 409,
            OrderError::NoAdapter(_) => 422,
            OrderError::AdapterUnavailable(_) => 503,
            OrderError::AdapterRejected(_) => 422,
            OrderError::Storage(_) | OrderError::EventLog(_) => 500,
        }
    }
}

impl From<crate::persistence::StoreError> for OrderError {
    fn from(e: crate::persistence::StoreError) -> Self {
        OrderError::Storage(e.to_string())
    }
}

impl From<crate::event_log::EventLogError> for OrderError {
    fn from(e: crate::event_log::EventLogError) -> Self {
        OrderError::EventLog(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(OrderError::Validation("x".into()).code(), "INVALID_ORDER");
        assert_eq!(OrderError::NotFound(Uuid::nil()).code(), "ORDER_NOT_FOUND");
        assert_eq!(
            OrderError::AdapterUnavailable("timeout".into()).code(),
            "ADAPTER_UNAVAILABLE"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(OrderError::Validation("x".into()).http_status(), 400);
        assert_eq!(OrderError::NotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(
            OrderError::IllegalTransition {
                order_id: Uuid::nil(),
                from: OrderStatus::Filled,
                to: OrderStatus::Cancelled,
            }
            .http_status(),
            409
        );
        assert_eq!(OrderError::Storage("db".into()).http_status(), 500);
    }
}
