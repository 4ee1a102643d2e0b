use thiserror::Error;

use crate::controller::FormModeKind;
use crate::models::RecordId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("application {0} not found")]
    NotFound(RecordId),
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    #[error("another change is still in flight")]
    ConcurrentMutationRejected,
    #[error("a form is already open")]
    FormOccupied,
    #[error("no form is open")]
    FormClosed,
    #[error("form must be {expected:?} for this operation")]
    WrongFormMode { expected: FormModeKind },
    #[error("change saved, but refreshing the list failed: {0}")]
    ReloadFailed(Box<TrackerError>),
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::NetworkFailure(err.to_string())
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
