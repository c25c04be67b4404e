//! Order lifecycle state machine
//!
//! State ids are designed for PostgreSQL storage as SMALLINT.
//! Terminal states: FILLED (50), CANCELLED (-10), REJECTED (-20),
//! EXPIRED (-30).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order lifecycle states.
///
/// Legal transitions:
///
/// ```text
/// PENDING → SUBMITTING → SUBMITTED → ACCEPTED → PARTIAL* → FILLED
///                                             → CANCELLED
///                                             → REJECTED
///                                             → EXPIRED
/// SUBMITTING → REJECTED          (pre-adapter or synchronous rejection)
/// (any non-terminal) → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OrderStatus {
    /// Intent received, nothing persisted to the exchange yet.
    Pending = 0,
    /// Persisted locally, adapter call in flight (persist-before-call).
    Submitting = 10,
    /// Exchange acknowledged receipt.
    Submitted = 20,
    /// Exchange accepted the order into its book.
    Accepted = 30,
    /// At least one fill received, quantity remains.
    Partial = 40,
    /// Terminal: fully filled.
    Filled = 50,
    /// Terminal: cancelled before completion.
    Cancelled = -10,
    /// Terminal: rejected by the exchange or pre-flight checks.
    Rejected = -20,
    /// Terminal: expired per its time-in-force.
    Expired = -30,
}

impl OrderStatus {
    /// Check if no further transitions are possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Whether the exchange may still produce fills for this order.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Submitted | OrderStatus::Accepted | OrderStatus::Partial
        )
    }

    /// Check whether `next` is reachable from this state along a legal edge.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        // Cancellation is legal from every non-terminal state.
        if next == Cancelled {
            return true;
        }
        match (self, next) {
            (Pending, Submitting) => true,
            (Submitting, Submitted) | (Submitting, Rejected) => true,
            (Submitted, Accepted)
            | (Submitted, Partial)
            | (Submitted, Filled)
            | (Submitted, Rejected)
            | (Submitted, Expired) => true,
            (Accepted, Partial)
            | (Accepted, Filled)
            | (Accepted, Rejected)
            | (Accepted, Expired) => true,
            (Partial, Partial) | (Partial, Filled) | (Partial, Expired) => true,
            _ => false,
        }
    }

    /// Get the numeric state id for PostgreSQL storage.
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a PostgreSQL state id.
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::Pending),
            10 => Some(OrderStatus::Submitting),
            20 => Some(OrderStatus::Submitted),
            30 => Some(OrderStatus::Accepted),
            40 => Some(OrderStatus::Partial),
            50 => Some(OrderStatus::Filled),
            -10 => Some(OrderStatus::Cancelled),
            -20 => Some(OrderStatus::Rejected),
            -30 => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitting => "submitting",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for OrderStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        OrderStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[OrderStatus] = &[
        OrderStatus::Pending,
        OrderStatus::Submitting,
        OrderStatus::Submitted,
        OrderStatus::Accepted,
        OrderStatus::Partial,
        OrderStatus::Filled,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
        OrderStatus::Expired,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());

        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Submitting.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::Accepted.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn test_happy_path_edges() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Submitting));
        assert!(OrderStatus::Submitting.can_transition_to(OrderStatus::Submitted));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Accepted));
        assert!(OrderStatus::Accepted.can_transition_to(OrderStatus::Partial));
        assert!(OrderStatus::Partial.can_transition_to(OrderStatus::Partial));
        assert!(OrderStatus::Partial.can_transition_to(OrderStatus::Filled));
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for s in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(
                s.can_transition_to(OrderStatus::Cancelled),
                "{s} should allow cancellation"
            );
        }
    }

    #[test]
    fn test_no_exit_from_terminal() {
        for terminal in ALL.iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(*next),
                    "{terminal} must not transition to {next}"
                );
            }
        }
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Submitted));
        assert!(!OrderStatus::Submitting.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Partial.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::Partial.can_transition_to(OrderStatus::Submitted));
    }

    #[test]
    fn test_state_id_roundtrip() {
        for s in ALL {
            assert_eq!(OrderStatus::from_id(s.id()), Some(*s));
        }
        assert!(OrderStatus::from_id(999).is_none());
    }
}
