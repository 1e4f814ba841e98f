//! External task record and its lock.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;

/// Topic name a task is published under and workers subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TopicName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Exclusive, time-bounded claim on a task.
///
/// Owner and expiration live in one value so they are always set and cleared
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLock {
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TaskLock {
    pub fn new(worker_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.worker_id == worker_id && !self.is_expired(now)
    }
}

/// `now` plus `millis`, or `None` when the result is not a representable time.
pub fn expiry_after(now: DateTime<Utc>, millis: i64) -> Option<DateTime<Utc>> {
    Duration::try_milliseconds(millis).and_then(|delta| now.checked_add_signed(delta))
}

/// Process context the task was emitted from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub activity_id: Option<String>,
    pub activity_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
}

/// A unit of work waiting for an out-of-process worker.
///
/// Only the lock scheduler (lock) and the lifecycle operations
/// (complete / failure / unlock / extend) mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTask {
    pub id: TaskId,
    pub topic: TopicName,
    pub context: ExecutionContext,
    pub priority: i64,
    pub retries: Option<u32>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub lock: Option<TaskLock>,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
}

impl ExternalTask {
    pub fn new(id: TaskId, topic: TopicName, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            topic,
            context: ExecutionContext::default(),
            priority: 0,
            retries: None,
            error_message: None,
            error_details: None,
            lock: None,
            suspended: false,
            created_at,
        }
    }

    /// A task with zero retries left has an open incident and is skipped.
    pub fn has_incident(&self) -> bool {
        self.retries == Some(0)
    }

    /// Lockable iff unlocked (or lock expired), active, and without incident.
    pub fn is_lockable(&self, now: DateTime<Utc>) -> bool {
        let unlocked = self.lock.as_ref().is_none_or(|lock| lock.is_expired(now));
        unlocked && !self.suspended && !self.has_incident()
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.lock.as_ref().map(|lock| lock.worker_id.as_str())
    }

    pub fn lock_expiration(&self) -> Option<DateTime<Utc>> {
        self.lock.as_ref().map(|lock| lock.expires_at)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.context.tenant_id.as_deref()
    }
}

/// Input for inserting a task into a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExternalTask {
    pub topic_name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(flatten)]
    pub context: ExecutionContext,
    #[serde(default)]
    pub variables: super::VariableMap,
}

impl NewExternalTask {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: super::TypedValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn task() -> ExternalTask {
        ExternalTask::new(TaskId::from_ulid(Ulid::new()), "aTopic".into(), at(0))
    }

    #[test]
    fn fresh_task_is_lockable() {
        assert!(task().is_lockable(at(1)));
    }

    #[rstest]
    #[case::held(at(10), false)]
    #[case::expires_now(at(5), true)]
    #[case::expired(at(1), true)]
    fn lock_expiry_controls_lockability(#[case] expires_at: DateTime<Utc>, #[case] lockable: bool) {
        let mut t = task();
        t.lock = Some(TaskLock::new("w", expires_at));
        assert_eq!(t.is_lockable(at(5)), lockable);
    }

    #[test]
    fn suspended_and_incident_tasks_are_not_lockable() {
        let mut suspended = task();
        suspended.suspended = true;
        assert!(!suspended.is_lockable(at(1)));

        let mut incident = task();
        incident.retries = Some(0);
        assert!(!incident.is_lockable(at(1)));
    }

    #[test]
    fn expiry_after_reports_unrepresentable_times() {
        assert_eq!(expiry_after(at(0), 1_500), Some(at(1) + Duration::milliseconds(500)));
        assert_eq!(expiry_after(at(0), i64::MAX), None);
    }

    #[test]
    fn lock_holder_check_respects_expiry() {
        let lock = TaskLock::new("w1", at(0) + Duration::seconds(30));
        assert!(lock.is_held_by("w1", at(10)));
        assert!(!lock.is_held_by("w2", at(10)));
        assert!(!lock.is_held_by("w1", at(30)));
    }
}
