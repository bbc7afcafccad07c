use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::types::{InstrumentId, OrderId, OrderStatus, Quantity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// Invalid price (zero, or present/absent where the kind forbids it)
    InvalidPrice,

    /// Invalid quantity (zero)
    InvalidQuantity(Quantity),

    /// Cancel references an order id that is not resting and was never
    /// processed by this instrument's worker
    UnknownOrder(OrderId),

    /// Cancel/modify against an order already FILLED or CANCELLED;
    /// reported as a no-op, not a failure
    AlreadyTerminal {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Book state corruption detected (e.g. overfill). Fatal for the
    /// instrument's worker: no further matching happens on it
    InvariantViolation(String),

    /// The instrument's worker halted after an invariant violation
    Halted(InstrumentId),

    /// The instrument's worker task is gone (shutdown or panic)
    WorkerGone(InstrumentId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidPrice => write!(f, "invalid price"),
            EngineError::InvalidQuantity(qty) => write!(f, "invalid quantity {}", qty),
            EngineError::UnknownOrder(id) => write!(f, "unknown order {}", id),
            EngineError::AlreadyTerminal { order_id, status } => {
                write!(f, "order {} already terminal ({})", order_id, status)
            }
            EngineError::InvariantViolation(msg) => {
                write!(f, "engine invariant violation: {}", msg)
            }
            EngineError::Halted(instrument) => {
                write!(f, "matching halted for instrument {}", instrument)
            }
            EngineError::WorkerGone(instrument) => {
                write!(f, "worker for instrument {} is gone", instrument)
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
