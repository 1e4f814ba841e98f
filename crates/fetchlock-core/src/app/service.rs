//! External task lifecycle operations.
//!
//! Every mutation that leaves a task lockable signals its topic, so suspended
//! fetches pick it up without waiting for their timeout.

use std::sync::Arc;

use tracing::{debug, info};

use crate::app::suspension::SuspensionManager;
use crate::domain::{ExternalTask, NewExternalTask, StoreError, TaskId, TopicName, expiry_after};
use crate::ports::{Clock, IdGenerator, TaskFailure, TaskStore};

pub struct ExternalTaskService {
    store: Arc<dyn TaskStore>,
    suspension: Arc<SuspensionManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ExternalTaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        suspension: Arc<SuspensionManager>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            suspension,
            clock,
            ids,
        }
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<ExternalTask>, StoreError> {
        self.store.get(id).await
    }

    pub async fn create(&self, new_task: NewExternalTask) -> Result<ExternalTask, StoreError> {
        if new_task.topic_name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "topicName must not be empty".to_string(),
            ));
        }

        let mut task = ExternalTask::new(
            self.ids.generate_task_id(),
            TopicName::new(new_task.topic_name),
            self.clock.now(),
        );
        task.priority = new_task.priority;
        task.retries = new_task.retries;
        task.context = new_task.context;

        self.store.insert(task.clone(), new_task.variables).await?;
        info!(task_id = %task.id, topic = %task.topic, "created external task");
        self.signal_if_lockable(&task);
        Ok(task)
    }

    pub async fn complete(&self, id: TaskId, worker_id: &str) -> Result<(), StoreError> {
        let task = self.store.complete(id, worker_id, self.clock.now()).await?;
        info!(task_id = %task.id, %worker_id, "completed external task");
        Ok(())
    }

    pub async fn handle_failure(&self, id: TaskId, failure: TaskFailure) -> Result<(), StoreError> {
        let task = self.store.handle_failure(id, failure, self.clock.now()).await?;
        if task.has_incident() {
            info!(task_id = %task.id, "external task has no retries left");
        }
        self.signal_if_lockable(&task);
        Ok(())
    }

    pub async fn unlock(&self, id: TaskId) -> Result<(), StoreError> {
        let task = self.store.unlock(id).await?;
        debug!(task_id = %task.id, "unlocked external task");
        self.signal_if_lockable(&task);
        Ok(())
    }

    /// Moves the lock expiration to now + `new_duration_ms`.
    pub async fn extend_lock(
        &self,
        id: TaskId,
        worker_id: &str,
        new_duration_ms: i64,
    ) -> Result<(), StoreError> {
        if new_duration_ms <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "newDuration must be greater than 0, got {new_duration_ms}"
            )));
        }
        let now = self.clock.now();
        let expires_at = expiry_after(now, new_duration_ms).ok_or_else(|| {
            StoreError::InvalidArgument(format!("newDuration is too large: {new_duration_ms}"))
        })?;
        self.store.extend_lock(id, worker_id, expires_at, now).await?;
        Ok(())
    }

    pub async fn set_priority(&self, id: TaskId, priority: i64) -> Result<(), StoreError> {
        self.store.set_priority(id, priority).await?;
        Ok(())
    }

    pub async fn set_retries(&self, id: TaskId, retries: u32) -> Result<(), StoreError> {
        let task = self.store.set_retries(id, retries).await?;
        self.signal_if_lockable(&task);
        Ok(())
    }

    pub async fn suspend(&self, id: TaskId) -> Result<(), StoreError> {
        self.store.set_suspended(id, true).await?;
        Ok(())
    }

    pub async fn activate(&self, id: TaskId) -> Result<(), StoreError> {
        let task = self.store.set_suspended(id, false).await?;
        self.signal_if_lockable(&task);
        Ok(())
    }

    fn signal_if_lockable(&self, task: &ExternalTask) {
        if task.is_lockable(self.clock.now()) {
            self.suspension.signal(&task.topic);
        }
    }
}
