use ulid::Ulid;

use crate::model::{SlotKey, Status};

/// Errors that are not business rejections: client mistakes and store faults.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("tenant has no booking rules configured")]
    TenantNotConfigured,
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: Ulid, from: Status, to: Status },
    #[error("reservation {0} is canceled")]
    ReservationCanceled(Ulid),
    #[error("invalid rules: {0}")]
    InvalidRules(String),
    #[error("invalid period: {0}")]
    InvalidPeriod(String),
    #[error("invalid reservation: {0}")]
    InvalidReservation(String),
    #[error("unknown period: {0}")]
    UnknownPeriod(String),
    #[error("period name {0:?} already used for this day")]
    DuplicatePeriodName(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("slot {0} is contended, retry the operation")]
    Contention(SlotKey),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Infrastructure faults the caller may retry as a whole.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Contention(_) | EngineError::WalError(_))
    }
}
