use thiserror::Error;
use uuid::Uuid;

use crate::backend::RemoteError;

/// Closed classification of every failure the crate can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StaleJob,
    PlaceholderTarget,
    AllTargetsPlaceholder,
    JobCompleted,
    Busy,
    Connection,
    AuthExpired,
    NotFound,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::StaleJob => write!(f, "stale job"),
            ErrorKind::PlaceholderTarget => write!(f, "placeholder target"),
            ErrorKind::AllTargetsPlaceholder => write!(f, "all targets placeholder"),
            ErrorKind::JobCompleted => write!(f, "job completed"),
            ErrorKind::Busy => write!(f, "busy"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::AuthExpired => write!(f, "auth expired"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrewError {
    #[error("Job changed while the operation was running (expected {expected}, now {current:?})")]
    StaleJob {
        expected: Uuid,
        current: Option<Uuid>,
    },

    #[error("Helper {0} has not finished signing up and cannot be assigned")]
    PlaceholderTarget(Uuid),

    #[error("Every selected helper for job {0} is still a placeholder")]
    AllTargetsPlaceholder(Uuid),

    #[error("Job {0} is completed and its assignment can no longer change")]
    JobCompleted(Uuid),

    #[error("An operation on job {0} is already in progress")]
    OperationInProgress(Uuid),

    #[error("A message queue is already in progress")]
    QueueInProgress,

    #[error("Job {job_id} is missing {what}")]
    MissingPrerequisite { job_id: Uuid, what: &'static str },

    #[error("{0}")]
    Remote(RemoteError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

impl CrewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrewError::StaleJob { .. } => ErrorKind::StaleJob,
            CrewError::PlaceholderTarget(_) => ErrorKind::PlaceholderTarget,
            CrewError::AllTargetsPlaceholder(_) => ErrorKind::AllTargetsPlaceholder,
            CrewError::JobCompleted(_) => ErrorKind::JobCompleted,
            CrewError::OperationInProgress(_) | CrewError::QueueInProgress => ErrorKind::Busy,
            CrewError::Remote(remote) => remote.kind,
            CrewError::MissingPrerequisite { .. }
            | CrewError::Storage(_)
            | CrewError::Config(_)
            | CrewError::Decode(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the failure came back from the remote store (and so the local
    /// copy may have drifted from remote truth).
    pub fn is_remote(&self) -> bool {
        matches!(self, CrewError::Remote(_) | CrewError::Decode(_))
    }
}

impl From<RemoteError> for CrewError {
    fn from(err: RemoteError) -> Self {
        CrewError::Remote(err)
    }
}

pub type Result<T> = std::result::Result<T, CrewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_their_classification() {
        let err = CrewError::from(RemoteError::new(ErrorKind::AuthExpired, "session expired"));
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "session expired");
    }

    #[test]
    fn guard_errors_are_not_remote() {
        let id = Uuid::new_v4();
        assert_eq!(CrewError::OperationInProgress(id).kind(), ErrorKind::Busy);
        assert!(!CrewError::PlaceholderTarget(id).is_remote());
    }
}
