use std::fmt;

use ulid::Ulid;

use crate::model::{Amount, Window};

/// Why a window could not be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    AlreadyBooked,
    LockedByAnotherActor,
}

impl ConflictReason {
    /// Short label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            ConflictReason::AlreadyBooked => "already_booked",
            ConflictReason::LockedByAnotherActor => "locked_by_another_actor",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::AlreadyBooked => write!(f, "Slot already booked"),
            ConflictReason::LockedByAnotherActor => write!(f, "Slot locked by another employee"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    SlotUnavailable(ConflictReason),
    /// The actor already holds a lock overlapping the requested window.
    DuplicateLock(Ulid),
    /// Booking a window that differs from the actor's own overlapping lock.
    LockWindowMismatch { lock_id: Ulid, held: Window },
    NotFound(&'static str),
    Forbidden(&'static str),
    InvalidState(&'static str),
    AmountExceedsPending { amount: Amount, pending: Amount },
    InvalidAmount(&'static str),
    WindowElapsed(Window),
    LimitExceeded(&'static str),
    /// The commit was not made durable; no state changed.
    TransactionAborted(String),
    /// Storage is unreachable or its outcome is unknown.
    DependencyFailure(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::DuplicateLock(_) => "duplicate_lock",
            EngineError::LockWindowMismatch { .. } => "lock_window_mismatch",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::AmountExceedsPending { .. } => "amount_exceeds_pending",
            EngineError::InvalidAmount(_) => "invalid_amount",
            EngineError::WindowElapsed(_) => "window_elapsed",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::TransactionAborted(_) => "transaction_aborted",
            EngineError::DependencyFailure(_) => "dependency_failure",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::SlotUnavailable(reason) => write!(f, "{reason}"),
            EngineError::DuplicateLock(id) => write!(
                f,
                "Slot already locked by you ({id}); release or book it instead"
            ),
            EngineError::LockWindowMismatch { lock_id, held } => write!(
                f,
                "Your lock {lock_id} holds {held}; book exactly that window or release it first"
            ),
            EngineError::NotFound(what) => write!(f, "{what} not found"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::AmountExceedsPending { amount, pending } => write!(
                f,
                "Settlement amount {amount} exceeds pending amount {pending}"
            ),
            EngineError::InvalidAmount(msg) => write!(f, "invalid amount: {msg}"),
            EngineError::WindowElapsed(window) => {
                write!(f, "Window {window} has already elapsed")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::TransactionAborted(e) => write!(f, "transaction aborted: {e}"),
            EngineError::DependencyFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
