//! Error types and their classification.
//!
//! - `StoreError`: raised by a task store or a lifecycle operation.
//! - `FetchError`: what a fetch call resolves to when it does not succeed.
//!   The handler is the only place a `StoreError` is turned into one.
//! - `AuthError`: credential failures, always answered with a challenge.

use thiserror::Error;

use super::{TaskId, VariableError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("External task with id {0} does not exist")]
    NotFound(TaskId),

    #[error("External task {task_id} cannot be modified by worker '{worker_id}'. It is locked by worker '{owner}'.")]
    NotLockOwner {
        task_id: TaskId,
        worker_id: String,
        owner: String,
    },

    #[error("External task {0} is not locked")]
    NotLocked(TaskId),

    #[error("{0}")]
    InvalidArgument(String),

    /// Failure of the storage backend itself.
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// True for errors caused by the caller rather than the backend.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::NotLockOwner { .. } | Self::NotLocked(_) | Self::InvalidArgument(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Malformed request or timeout out of bounds; nothing was locked.
    #[error("{0}")]
    Validation(String),

    /// Engine failure while locking or projecting; carries the original message.
    #[error("{0}")]
    Engine(String),
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        Self::Engine(err.to_string())
    }
}

impl From<VariableError> for FetchError {
    fn from(err: VariableError) -> Self {
        Self::Engine(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingCredentials,

    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    #[error("invalid credentials for user '{0}'")]
    InvalidPassword(String),
}
