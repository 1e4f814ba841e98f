//! TaskStore port: the source of truth for external tasks and their locks.
//!
//! Every mutation is atomic per task. `try_lock` is the compare-and-set the
//! lock scheduler is built on: it succeeds only if the task is lockable at
//! `now`, and two concurrent calls for one task never both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ExternalTask, StoreError, TaskId, TopicName, VariableMap};

/// Failure report from the worker holding a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub worker_id: String,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub retries: u32,
    /// Milliseconds the task stays locked before it can be fetched again.
    pub retry_timeout: i64,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: ExternalTask, variables: VariableMap) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<ExternalTask>, StoreError>;

    /// Tasks of the given topics that are lockable at `now`.
    async fn find_lockable(
        &self,
        topics: &[TopicName],
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalTask>, StoreError>;

    /// Compare-and-set lock. `Ok(None)` means another worker got there first
    /// (or the task is gone / no longer lockable).
    async fn try_lock(
        &self,
        id: TaskId,
        worker_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExternalTask>, StoreError>;

    async fn variables(&self, id: TaskId) -> Result<VariableMap, StoreError>;

    /// Earliest future lock expiration among tasks of `topics`.
    async fn next_lock_expiration(
        &self,
        topics: &[TopicName],
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Removes a task held by `worker_id`.
    async fn complete(
        &self,
        id: TaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError>;

    async fn handle_failure(
        &self,
        id: TaskId,
        failure: TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError>;

    async fn unlock(&self, id: TaskId) -> Result<ExternalTask, StoreError>;

    async fn extend_lock(
        &self,
        id: TaskId,
        worker_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError>;

    async fn set_retries(&self, id: TaskId, retries: u32) -> Result<ExternalTask, StoreError>;

    async fn set_priority(&self, id: TaskId, priority: i64) -> Result<ExternalTask, StoreError>;

    async fn set_suspended(&self, id: TaskId, suspended: bool)
    -> Result<ExternalTask, StoreError>;
}
