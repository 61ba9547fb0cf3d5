use ulid::Ulid;

use crate::model::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Check-out not after check-in, date out of range, or unparseable.
    InvalidDateRange(String),
    InvalidGuestCount { requested: u32, max: u32 },
    KindMismatch {
        resource_id: ResourceId,
        listing: &'static str,
        requested: &'static str,
    },
    /// Listing or its pricing record does not exist.
    ResourceNotBookable(ResourceId),
    /// Candidate stay overlaps an existing reservation.
    DoubleBooking {
        resource_id: ResourceId,
        conflicting: Ulid,
    },
    SoldOut {
        resource_id: ResourceId,
        remaining: u32,
    },
    NotFound(Ulid),
    AlreadyExists(ResourceId),
    HasReservations(ResourceId),
    LimitExceeded(&'static str),
    /// Lock timeout, WAL failure or a lost commit task. Nothing was written.
    TransactionFailure(String),
}

/// HTTP-style outcome class of an engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    BadRequest,
    NotFound,
    Conflict,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Created => 201,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::BadRequest => "bad_request",
            Status::NotFound => "not_found",
            Status::Conflict => "conflict",
            Status::ServiceUnavailable => "unavailable",
        }
    }
}

impl EngineError {
    pub fn status(&self) -> Status {
        match self {
            EngineError::InvalidDateRange(_)
            | EngineError::InvalidGuestCount { .. }
            | EngineError::KindMismatch { .. }
            | EngineError::LimitExceeded(_) => Status::BadRequest,
            EngineError::ResourceNotBookable(_) | EngineError::NotFound(_) => Status::NotFound,
            EngineError::DoubleBooking { .. }
            | EngineError::SoldOut { .. }
            | EngineError::AlreadyExists(_)
            | EngineError::HasReservations(_) => Status::Conflict,
            EngineError::TransactionFailure(_) => Status::ServiceUnavailable,
        }
    }

    /// SQLSTATE reported over the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::InvalidDateRange(_) => "22007",
            EngineError::InvalidGuestCount { .. } | EngineError::KindMismatch { .. } => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::ResourceNotBookable(_) | EngineError::NotFound(_) => "P0002",
            EngineError::DoubleBooking { .. } => "23P01",
            EngineError::SoldOut { .. } => "23514",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::HasReservations(_) => "23503",
            EngineError::TransactionFailure(_) => "40001",
        }
    }

    /// Only infrastructure failures are safe to retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransactionFailure(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange(msg) => write!(f, "invalid date range: {msg}"),
            EngineError::InvalidGuestCount { requested, max } => {
                write!(f, "invalid guest count {requested} (allowed 1..={max})")
            }
            EngineError::KindMismatch {
                resource_id,
                listing,
                requested,
            } => write!(
                f,
                "resource {resource_id} is a {listing}, cannot take a {requested} booking"
            ),
            EngineError::ResourceNotBookable(id) => write!(f, "resource {id} is not bookable"),
            EngineError::DoubleBooking {
                resource_id,
                conflicting,
            } => write!(
                f,
                "dates unavailable on resource {resource_id}: overlaps reservation {conflicting}"
            ),
            EngineError::SoldOut {
                resource_id,
                remaining,
            } => write!(f, "resource {resource_id} sold out: {remaining} seats left"),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "resource already exists: {id}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete resource {id}: has reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::TransactionFailure(e) => write!(f, "transaction failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_distinct_from_validation() {
        let double = EngineError::DoubleBooking {
            resource_id: 1,
            conflicting: Ulid::new(),
        };
        let bad_dates = EngineError::InvalidDateRange("check-out before check-in".into());
        assert_eq!(double.status().code(), 409);
        assert_eq!(bad_dates.status().code(), 400);
        assert_ne!(double.sqlstate(), bad_dates.sqlstate());
    }

    #[test]
    fn status_codes() {
        assert_eq!(EngineError::ResourceNotBookable(3).status(), Status::NotFound);
        assert_eq!(
            EngineError::TransactionFailure("lock timeout".into()).status().code(),
            503
        );
        assert_eq!(Status::Created.code(), 201);
    }

    #[test]
    fn only_transaction_failure_retryable() {
        assert!(EngineError::TransactionFailure("wal".into()).is_retryable());
        assert!(!EngineError::DoubleBooking { resource_id: 1, conflicting: Ulid::new() }.is_retryable());
        assert!(!EngineError::InvalidDateRange("x".into()).is_retryable());
    }

    #[test]
    fn display_names_the_conflict() {
        let id = Ulid::new();
        let e = EngineError::DoubleBooking {
            resource_id: 42,
            conflicting: id,
        };
        let msg = e.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains(&id.to_string()));
    }
}
