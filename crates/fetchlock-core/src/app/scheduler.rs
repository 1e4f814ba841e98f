//! Lock scheduler: orders candidates and locks them one compare-and-set at a time.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::matcher::Candidate;
use crate::domain::{ExternalTask, StoreError, TopicSubscription, expiry_after};
use crate::ports::TaskStore;

/// A task the scheduler locked, with the subscription it was fetched for.
#[derive(Debug, Clone)]
pub struct LockedCandidate {
    pub task: ExternalTask,
    pub subscription: usize,
}

pub struct LockScheduler<'a> {
    store: &'a dyn TaskStore,
}

impl<'a> LockScheduler<'a> {
    pub fn new(store: &'a dyn TaskStore) -> Self {
        Self { store }
    }

    /// Sorts candidates in fetch order.
    ///
    /// With priority: priority desc, creation time asc, id. Without: creation
    /// time asc, id.
    pub fn order(candidates: &mut [Candidate], use_priority: bool) {
        if use_priority {
            candidates.sort_by_key(|c| (Reverse(c.task.priority), c.task.created_at, c.task.id));
        } else {
            candidates.sort_by_key(|c| (c.task.created_at, c.task.id));
        }
    }

    /// Locks up to `max_tasks` candidates for `worker_id`.
    ///
    /// A lost race skips to the next candidate. A store error aborts the walk;
    /// tasks locked before it stay locked.
    pub async fn try_lock(
        &self,
        worker_id: &str,
        max_tasks: usize,
        use_priority: bool,
        mut candidates: Vec<Candidate>,
        subscriptions: &[TopicSubscription],
        now: DateTime<Utc>,
    ) -> Result<Vec<LockedCandidate>, StoreError> {
        Self::order(&mut candidates, use_priority);

        let mut locked = Vec::with_capacity(max_tasks.min(candidates.len()));
        for candidate in candidates {
            if locked.len() >= max_tasks {
                break;
            }
            let lock_duration = subscriptions[candidate.subscription].lock_duration;
            let expires_at = expiry_after(now, lock_duration).ok_or_else(|| {
                StoreError::InvalidArgument(format!("lockDuration is too large: {lock_duration}"))
            })?;

            match self
                .store
                .try_lock(candidate.task.id, worker_id, expires_at, now)
                .await?
            {
                Some(task) => {
                    debug!(task_id = %task.id, topic = %task.topic, %worker_id, "locked task");
                    locked.push(LockedCandidate {
                        task,
                        subscription: candidate.subscription,
                    });
                }
                None => debug!(task_id = %candidate.task.id, "lost lock race"),
            }
        }
        Ok(locked)
    }
}
