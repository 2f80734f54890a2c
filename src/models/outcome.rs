use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a raw record was kept out of the curated zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectReason {
    /// The container or the record is not valid JSON object syntax
    Malformed,
    MissingField(String),
    WrongType(String),
    InvalidTimestamp(String),
    FutureTimestamp,
    OutOfRange(String),
    InvalidCoordinates(String),
}

impl RejectReason {
    /// Reason code without the field name, for grouping in metrics
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::MissingField(_) => "missing_field",
            RejectReason::WrongType(_) => "wrong_type",
            RejectReason::InvalidTimestamp(_) => "invalid_timestamp",
            RejectReason::FutureTimestamp => "future_timestamp",
            RejectReason::OutOfRange(_) => "out_of_range",
            RejectReason::InvalidCoordinates(_) => "invalid_coordinates",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed | RejectReason::FutureTimestamp => f.write_str(self.code()),
            RejectReason::MissingField(field)
            | RejectReason::WrongType(field)
            | RejectReason::InvalidTimestamp(field)
            | RejectReason::OutOfRange(field)
            | RejectReason::InvalidCoordinates(field) => write!(f, "{}:{}", self.code(), field),
        }
    }
}

/// Verdict of the schema validator for one raw record.
///
/// A valid outcome carries the typed record; the raw input is never
/// modified either way.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome<T> {
    Valid(T),
    Rejected(RejectReason),
}

impl<T> ValidationOutcome<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            ValidationOutcome::Valid(_) => None,
            ValidationOutcome::Rejected(reason) => Some(reason),
        }
    }

    pub fn into_valid(self) -> Option<T> {
        match self {
            ValidationOutcome::Valid(record) => Some(record),
            ValidationOutcome::Rejected(_) => None,
        }
    }
}
