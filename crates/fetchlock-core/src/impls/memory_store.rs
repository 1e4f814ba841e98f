//! In-memory task store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ExternalTask, StoreError, TaskId, TaskLock, TopicName, VariableMap, expiry_after,
};
use crate::ports::{TaskFailure, TaskStore};

/// Store state guarded by one mutex.
///
/// - `tasks` is the single source of truth.
/// - `by_topic` only holds ids and is kept in sync on insert/remove.
#[derive(Default)]
struct InMemoryStoreState {
    tasks: HashMap<TaskId, ExternalTask>,
    variables: HashMap<TaskId, VariableMap>,
    by_topic: HashMap<TopicName, BTreeSet<TaskId>>,
}

impl InMemoryStoreState {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut ExternalTask, StoreError> {
        self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    fn remove(&mut self, id: TaskId) -> Option<ExternalTask> {
        let task = self.tasks.remove(&id)?;
        self.variables.remove(&id);
        if let Some(ids) = self.by_topic.get_mut(&task.topic) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_topic.remove(&task.topic);
            }
        }
        Some(task)
    }

    fn topic_tasks<'a>(&'a self, topics: &'a [TopicName]) -> impl Iterator<Item = &'a ExternalTask> {
        topics
            .iter()
            .filter_map(|topic| self.by_topic.get(topic))
            .flatten()
            .filter_map(|id| self.tasks.get(id))
    }
}

/// Fails with `NotLocked` / `NotLockOwner` unless `worker_id` holds the lock.
fn ensure_owner(task: &ExternalTask, worker_id: &str) -> Result<(), StoreError> {
    match &task.lock {
        None => Err(StoreError::NotLocked(task.id)),
        Some(lock) if lock.worker_id != worker_id => Err(StoreError::NotLockOwner {
            task_id: task.id,
            worker_id: worker_id.to_string(),
            owner: lock.worker_id.clone(),
        }),
        Some(_) => Ok(()),
    }
}

/// Task store backed by a `HashMap`.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Tasks currently locked by `worker_id` (regardless of expiry).
    pub async fn locked_by(&self, worker_id: &str) -> Vec<ExternalTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|task| task.worker_id() == Some(worker_id))
            .cloned()
            .collect()
    }

    /// Number of tasks carrying any lock.
    pub async fn locked_count(&self) -> usize {
        let state = self.state.lock().await;
        state.tasks.values().filter(|task| task.lock.is_some()).count()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: ExternalTask, variables: VariableMap) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::InvalidArgument(format!(
                "External task with id {} already exists",
                task.id
            )));
        }
        state
            .by_topic
            .entry(task.topic.clone())
            .or_default()
            .insert(task.id);
        state.variables.insert(task.id, variables);
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<ExternalTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn find_lockable(
        &self,
        topics: &[TopicName],
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .topic_tasks(topics)
            .filter(|task| task.is_lockable(now))
            .cloned()
            .collect())
    }

    async fn try_lock(
        &self,
        id: TaskId,
        worker_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExternalTask>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if !task.is_lockable(now) {
            return Ok(None);
        }
        task.lock = Some(TaskLock::new(worker_id, expires_at));
        Ok(Some(task.clone()))
    }

    async fn variables(&self, id: TaskId) -> Result<VariableMap, StoreError> {
        let state = self.state.lock().await;
        Ok(state.variables.get(&id).cloned().unwrap_or_default())
    }

    async fn next_lock_expiration(
        &self,
        topics: &[TopicName],
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .topic_tasks(topics)
            .filter(|task| !task.suspended && !task.has_incident())
            .filter_map(ExternalTask::lock_expiration)
            .filter(|expires_at| *expires_at > now)
            .min())
    }

    async fn complete(
        &self,
        id: TaskId,
        worker_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        ensure_owner(state.task_mut(id)?, worker_id)?;
        state.remove(id).ok_or(StoreError::NotFound(id))
    }

    async fn handle_failure(
        &self,
        id: TaskId,
        failure: TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError> {
        if failure.retry_timeout < 0 {
            return Err(StoreError::InvalidArgument(
                "retryTimeout must not be negative".to_string(),
            ));
        }
        let retry_at = match failure.retry_timeout {
            0 => None,
            timeout => Some(expiry_after(now, timeout).ok_or_else(|| {
                StoreError::InvalidArgument(format!("retryTimeout is too large: {timeout}"))
            })?),
        };
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        ensure_owner(task, &failure.worker_id)?;

        task.error_message = failure.error_message;
        task.error_details = failure.error_details;
        task.retries = Some(failure.retries);
        task.lock = retry_at.map(|expires_at| TaskLock::new(failure.worker_id, expires_at));
        Ok(task.clone())
    }

    async fn unlock(&self, id: TaskId) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.lock = None;
        Ok(task.clone())
    }

    async fn extend_lock(
        &self,
        id: TaskId,
        worker_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        ensure_owner(task, worker_id)?;
        if task.lock.as_ref().is_some_and(|lock| lock.is_expired(now)) {
            return Err(StoreError::NotLocked(id));
        }
        task.lock = Some(TaskLock::new(worker_id, expires_at));
        Ok(task.clone())
    }

    async fn set_retries(&self, id: TaskId, retries: u32) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.retries = Some(retries);
        Ok(task.clone())
    }

    async fn set_priority(&self, id: TaskId, priority: i64) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.priority = priority;
        Ok(task.clone())
    }

    async fn set_suspended(
        &self,
        id: TaskId,
        suspended: bool,
    ) -> Result<ExternalTask, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.suspended = suspended;
        Ok(task.clone())
    }
}
