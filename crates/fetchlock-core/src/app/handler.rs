//! Fetch-and-lock handler: validation, locking, long-poll and projection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::app::auth::Authentication;
use crate::app::matcher::TopicMatcher;
use crate::app::scheduler::{LockScheduler, LockedCandidate};
use crate::app::suspension::{SuspensionManager, SuspensionState};
use crate::domain::{
    FetchError, FetchRequest, LockedExternalTask, expiry_after, project_variables,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

pub const DEFAULT_MIN_TIMEOUT_MS: i64 = 1_000;
pub const DEFAULT_MAX_TIMEOUT_MS: i64 = 1_800_000;

/// Bounds for `asyncResponseTimeout`, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBounds {
    pub min_ms: i64,
    pub max_ms: i64,
}

impl Default for TimeoutBounds {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_MIN_TIMEOUT_MS,
            max_ms: DEFAULT_MAX_TIMEOUT_MS,
        }
    }
}

impl TimeoutBounds {
    pub fn check(&self, timeout_ms: i64) -> Result<(), FetchError> {
        if timeout_ms < self.min_ms {
            return Err(FetchError::Validation(format!(
                "The asynchronous response timeout cannot be set to a value less than {} milliseconds",
                self.min_ms
            )));
        }
        if timeout_ms > self.max_ms {
            return Err(FetchError::Validation(format!(
                "The asynchronous response timeout cannot be set to a value greater than {} milliseconds",
                self.max_ms
            )));
        }
        Ok(())
    }
}

/// Structural checks; nothing is locked when these fail.
///
/// Lock durations must yield a representable expiration from `now`.
pub fn validate(request: &FetchRequest, now: DateTime<Utc>) -> Result<(), FetchError> {
    if request.worker_id.trim().is_empty() {
        return Err(FetchError::Validation("workerId must not be empty".to_string()));
    }
    if request.max_tasks <= 0 {
        return Err(FetchError::Validation(format!(
            "maxTasks must be greater than 0, got {}",
            request.max_tasks
        )));
    }
    if request.topics.is_empty() {
        return Err(FetchError::Validation("topics must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for topic in &request.topics {
        if topic.topic_name.trim().is_empty() {
            return Err(FetchError::Validation("topicName must not be empty".to_string()));
        }
        if topic.lock_duration <= 0 {
            return Err(FetchError::Validation(format!(
                "lockDuration of topic '{}' must be greater than 0",
                topic.topic_name
            )));
        }
        if expiry_after(now, topic.lock_duration).is_none() {
            return Err(FetchError::Validation(format!(
                "lockDuration of topic '{}' is too large: {}",
                topic.topic_name, topic.lock_duration
            )));
        }
        if !seen.insert(topic.topic_name.as_str()) {
            return Err(FetchError::Validation(format!(
                "Topic '{}' is subscribed more than once",
                topic.topic_name
            )));
        }
    }
    Ok(())
}

pub struct FetchAndLockHandler {
    engine: String,
    store: Arc<dyn TaskStore>,
    suspension: Arc<SuspensionManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    bounds: TimeoutBounds,
}

impl FetchAndLockHandler {
    pub fn new(
        engine: impl Into<String>,
        store: Arc<dyn TaskStore>,
        suspension: Arc<SuspensionManager>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        bounds: TimeoutBounds,
    ) -> Self {
        Self {
            engine: engine.into(),
            store,
            suspension,
            clock,
            ids,
            bounds,
        }
    }

    pub fn bounds(&self) -> TimeoutBounds {
        self.bounds
    }

    /// Locks tasks for an authenticated caller, long-polling when nothing is
    /// available and a timeout was requested.
    pub async fn fetch_and_lock(
        &self,
        authentication: &Authentication,
        request: FetchRequest,
    ) -> Result<Vec<LockedExternalTask>, FetchError> {
        let span = info_span!(
            "fetch_and_lock",
            engine = %self.engine,
            worker_id = %request.worker_id,
            max_tasks = request.max_tasks,
        );
        async {
            let result = self.run(authentication, &request).await;
            match &result {
                Ok(tasks) => debug!(locked = tasks.len(), "fetch resolved"),
                Err(FetchError::Engine(message)) => warn!(%message, "engine error during fetch"),
                Err(FetchError::Validation(message)) => debug!(%message, "rejected fetch"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        authentication: &Authentication,
        request: &FetchRequest,
    ) -> Result<Vec<LockedExternalTask>, FetchError> {
        validate(request, self.clock.now())?;
        if let Some(timeout) = request.async_response_timeout {
            self.bounds.check(timeout)?;
        }

        let matcher = TopicMatcher::new(&request.topics)?;
        let max_tasks = usize::try_from(request.max_tasks).unwrap_or(usize::MAX);

        let Some(timeout_ms) = request.async_response_timeout else {
            let locked = self.lock_once(&matcher, authentication, request, max_tasks).await?;
            return self.project(&matcher, locked).await;
        };

        // The deadline is fixed once so each re-wait uses the remaining budget.
        let deadline = Instant::now() + StdDuration::from_millis(timeout_ms.unsigned_abs());
        let topics = matcher.topics();
        loop {
            // Register before locking so a signal between the attempt and the
            // wait is not lost.
            let mut waiter = self
                .suspension
                .register(self.ids.generate_waiter_id(), topics.clone());

            let locked = self.lock_once(&matcher, authentication, request, max_tasks).await?;
            if !locked.is_empty() {
                return self.project(&matcher, locked).await;
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = match self.store.next_lock_expiration(&topics, self.clock.now()).await? {
                Some(expires_at) => deadline.min(self.instant_of(expires_at)),
                None => deadline,
            };
            match waiter.wait_until(wake_at).await {
                SuspensionState::ResumedOnTimeout if wake_at >= deadline => {
                    debug!("long-poll timed out");
                    return Ok(Vec::new());
                }
                state => debug!(?state, "retrying fetch"),
            }
        }
    }

    async fn lock_once(
        &self,
        matcher: &TopicMatcher<'_>,
        authentication: &Authentication,
        request: &FetchRequest,
        max_tasks: usize,
    ) -> Result<Vec<LockedCandidate>, FetchError> {
        let now = self.clock.now();
        let candidates = matcher
            .find_candidates(self.store.as_ref(), authentication, now)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        Ok(LockScheduler::new(self.store.as_ref())
            .try_lock(
                &request.worker_id,
                max_tasks,
                request.use_priority,
                candidates,
                &request.topics,
                now,
            )
            .await?)
    }

    async fn project(
        &self,
        matcher: &TopicMatcher<'_>,
        locked: Vec<LockedCandidate>,
    ) -> Result<Vec<LockedExternalTask>, FetchError> {
        let mut out = Vec::with_capacity(locked.len());
        for LockedCandidate { task, subscription } in locked {
            let subscription = matcher.subscription(subscription);
            let variables = self.store.variables(task.id).await?;
            let variables = project_variables(
                &variables,
                subscription.variables.as_deref(),
                subscription.deserialize_values,
            )?;
            out.push(LockedExternalTask { task, variables });
        }
        Ok(out)
    }

    /// Runtime instant at which the clock reaches `at`.
    fn instant_of(&self, at: DateTime<Utc>) -> Instant {
        let delta = (at - self.clock.now()).to_std().unwrap_or_default();
        Instant::now() + delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ExternalTask, StoreError, TaskId, TopicName, TopicSubscription, TypedValue, VariableMap,
    };
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, SystemClock, UlidGenerator};
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn caller() -> Authentication {
        Authentication {
            user_id: "demo".to_string(),
            group_ids: vec![],
            tenant_ids: vec![],
        }
    }

    fn handler_over(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> (FetchAndLockHandler, Arc<SuspensionManager>) {
        let suspension = Arc::new(SuspensionManager::new());
        let handler = FetchAndLockHandler::new(
            "default",
            store,
            Arc::clone(&suspension),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
            TimeoutBounds::default(),
        );
        (handler, suspension)
    }

    async fn insert(store: &InMemoryTaskStore, topic: &str, priority: i64, vars: VariableMap) -> TaskId {
        let id = TaskId::from_ulid(Ulid::new());
        let mut task = ExternalTask::new(id, topic.into(), Utc::now());
        task.priority = priority;
        store.insert(task, vars).await.unwrap();
        id
    }

    fn example_request() -> FetchRequest {
        FetchRequest::new("aWorkerId", 5)
            .use_priority(true)
            .topic(TopicSubscription::new("aTopicName", 12_354).with_variables(&["aVariableName"]))
    }

    #[rstest]
    #[case::empty_worker(FetchRequest::new("", 1).topic(TopicSubscription::new("a", 1)))]
    #[case::zero_max_tasks(FetchRequest::new("w", 0).topic(TopicSubscription::new("a", 1)))]
    #[case::no_topics(FetchRequest::new("w", 1))]
    #[case::empty_topic(FetchRequest::new("w", 1).topic(TopicSubscription::new("", 1)))]
    #[case::zero_lock_duration(FetchRequest::new("w", 1).topic(TopicSubscription::new("a", 0)))]
    #[case::duplicate_topic(
        FetchRequest::new("w", 1)
            .topic(TopicSubscription::new("a", 1))
            .topic(TopicSubscription::new("a", 2))
    )]
    #[case::unrepresentable_lock_duration(
        FetchRequest::new("w", 1).topic(TopicSubscription::new("a", i64::MAX))
    )]
    fn structural_validation(#[case] request: FetchRequest) {
        assert!(matches!(validate(&request, Utc::now()), Err(FetchError::Validation(_))));
    }

    #[rstest]
    #[case::below_min(999, Some("less than 1000"))]
    #[case::at_min(1_000, None)]
    #[case::at_max(1_800_000, None)]
    #[case::above_max(1_800_001, Some("greater than 1800000"))]
    fn timeout_bounds(#[case] timeout: i64, #[case] error: Option<&str>) {
        match (TimeoutBounds::default().check(timeout), error) {
            (Ok(()), None) => {}
            (Err(FetchError::Validation(message)), Some(expected)) => {
                assert!(message.contains(expected), "{message}");
            }
            (other, _) => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn example_request_locks_and_filters_variables() {
        let store = InMemoryTaskStore::new();
        let vars = VariableMap::from([
            ("aVariableName".to_string(), TypedValue::string("aValue")),
            ("other".to_string(), TypedValue::Boolean(true)),
        ]);
        let id = insert(&store, "aTopicName", 0, vars).await;
        let (handler, _) = handler_over(Arc::new(store.clone()), Arc::new(SystemClock));

        let tasks = handler.fetch_and_lock(&caller(), example_request()).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task.id, id);
        assert_eq!(tasks[0].task.worker_id(), Some("aWorkerId"));
        assert_eq!(tasks[0].variables.keys().collect::<Vec<_>>(), vec!["aVariableName"]);
        assert_eq!(tasks[0].variables["aVariableName"].value, json!("aValue"));
        assert_eq!(store.locked_by("aWorkerId").await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_timeout_locks_nothing() {
        let store = InMemoryTaskStore::new();
        insert(&store, "aTopicName", 0, VariableMap::new()).await;
        let (handler, _) = handler_over(Arc::new(store.clone()), Arc::new(SystemClock));

        let err = handler
            .fetch_and_lock(&caller(), example_request().timeout(100))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Validation(_)));
        assert_eq!(store.locked_count().await, 0);
    }

    #[tokio::test]
    async fn unrepresentable_lock_duration_locks_nothing() {
        let store = InMemoryTaskStore::new();
        insert(&store, "a", 0, VariableMap::new()).await;
        let (handler, _) = handler_over(Arc::new(store.clone()), Arc::new(SystemClock));

        let request = FetchRequest::new("w", 1).topic(TopicSubscription::new("a", i64::MAX));
        let err = handler.fetch_and_lock(&caller(), request).await.unwrap_err();

        assert!(matches!(err, FetchError::Validation(ref message) if message.contains("too large")));
        assert_eq!(store.locked_count().await, 0);
    }

    #[tokio::test]
    async fn priority_fetch_returns_highest_priority() {
        let store = InMemoryTaskStore::new();
        insert(&store, "a", 1, VariableMap::new()).await;
        let high = insert(&store, "a", 10, VariableMap::new()).await;
        let (handler, _) = handler_over(Arc::new(store), Arc::new(SystemClock));

        let request = FetchRequest::new("w", 1)
            .use_priority(true)
            .topic(TopicSubscription::new("a", 1_000));
        let tasks = handler.fetch_and_lock(&caller(), request).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task.id, high);
    }

    #[tokio::test]
    async fn object_variables_follow_deserialize_flag() {
        let store = InMemoryTaskStore::new();
        let vars = VariableMap::from([(
            "customer".to_string(),
            TypedValue::object(r#"{"name":"Ada"}"#, "Customer"),
        )]);
        insert(&store, "a", 0, vars.clone()).await;
        insert(&store, "b", 0, vars).await;
        let (handler, _) = handler_over(Arc::new(store), Arc::new(SystemClock));

        let request = FetchRequest::new("w", 2)
            .topic(TopicSubscription::new("a", 1_000))
            .topic(TopicSubscription::new("b", 1_000).deserialized());
        let tasks = handler.fetch_and_lock(&caller(), request).await.unwrap();

        for task in tasks {
            let value = &task.variables["customer"].value;
            if task.task.topic == TopicName::new("a") {
                assert_eq!(value, &json!(r#"{"name":"Ada"}"#));
            } else {
                assert_eq!(value, &json!({"name": "Ada"}));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_topic_times_out_with_empty_result() {
        let (handler, suspension) =
            handler_over(Arc::new(InMemoryTaskStore::new()), Arc::new(SystemClock));

        let start = Instant::now();
        let request = FetchRequest::new("w", 1)
            .topic(TopicSubscription::new("nothing", 1_000))
            .timeout(1_000);
        let tasks = handler.fetch_and_lock(&caller(), request).await.unwrap();

        assert!(tasks.is_empty());
        assert!(start.elapsed() >= StdDuration::from_millis(1_000));
        assert_eq!(suspension.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_task_wakes_suspended_fetch() {
        let store = InMemoryTaskStore::new();
        let (handler, suspension) = handler_over(Arc::new(store.clone()), Arc::new(SystemClock));
        let handler = Arc::new(handler);

        let pending = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move {
                let request = FetchRequest::new("w", 1)
                    .topic(TopicSubscription::new("a", 1_000))
                    .timeout(60_000);
                handler.fetch_and_lock(&caller(), request).await
            }
        });
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(suspension.waiting(), 1);

        let id = insert(&store, "a", 0, VariableMap::new()).await;
        suspension.signal(&TopicName::new("a"));

        let tasks = pending.await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_signal_keeps_the_original_deadline() {
        let (handler, suspension) =
            handler_over(Arc::new(InMemoryTaskStore::new()), Arc::new(SystemClock));
        let handler = Arc::new(handler);
        let start = Instant::now();

        let pending = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move {
                let request = FetchRequest::new("w", 1)
                    .topic(TopicSubscription::new("a", 1_000))
                    .timeout(5_000);
                handler.fetch_and_lock(&caller(), request).await
            }
        });
        tokio::time::sleep(StdDuration::from_millis(3_000)).await;

        // nothing to lock: the fetch re-registers and waits out the rest
        assert_eq!(suspension.signal(&TopicName::new("a")), 1);
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(suspension.waiting(), 1);

        let tasks = pending.await.unwrap().unwrap();
        assert!(tasks.is_empty());
        let elapsed = start.elapsed();
        assert!(elapsed >= StdDuration::from_millis(5_000), "{elapsed:?}");
        assert!(elapsed < StdDuration::from_millis(6_000), "{elapsed:?}");
        assert_eq!(suspension.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_wakes_suspended_fetch() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let store = InMemoryTaskStore::new();
        let id = insert(&store, "a", 0, VariableMap::new()).await;
        store
            .try_lock(id, "other", start + chrono::Duration::seconds(2), start)
            .await
            .unwrap();
        let (handler, _) = handler_over(Arc::new(store), clock.clone());
        let handler = Arc::new(handler);

        let pending = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move {
                let request = FetchRequest::new("w", 1)
                    .topic(TopicSubscription::new("a", 1_000))
                    .timeout(60_000);
                handler.fetch_and_lock(&caller(), request).await
            }
        });
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        clock.advance(chrono::Duration::seconds(2));

        let tasks = pending.await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task.worker_id(), Some("w"));
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl TaskStore for BrokenStore {
        async fn insert(&self, _: ExternalTask, _: VariableMap) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get(&self, _: TaskId) -> Result<Option<ExternalTask>, StoreError> {
            Ok(None)
        }
        async fn find_lockable(
            &self,
            _: &[TopicName],
            _: DateTime<Utc>,
        ) -> Result<Vec<ExternalTask>, StoreError> {
            Err(StoreError::Backend("anExceptionMessage".to_string()))
        }
        async fn try_lock(
            &self,
            _: TaskId,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<Option<ExternalTask>, StoreError> {
            Ok(None)
        }
        async fn variables(&self, _: TaskId) -> Result<VariableMap, StoreError> {
            Ok(VariableMap::new())
        }
        async fn next_lock_expiration(
            &self,
            _: &[TopicName],
            _: DateTime<Utc>,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(None)
        }
        async fn complete(&self, id: TaskId, _: &str, _: DateTime<Utc>) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn handle_failure(
            &self,
            id: TaskId,
            _: crate::ports::TaskFailure,
            _: DateTime<Utc>,
        ) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn unlock(&self, id: TaskId) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn extend_lock(
            &self,
            id: TaskId,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn set_retries(&self, id: TaskId, _: u32) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn set_priority(&self, id: TaskId, _: i64) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn set_suspended(&self, id: TaskId, _: bool) -> Result<ExternalTask, StoreError> {
            Err(StoreError::NotFound(id))
        }
    }

    #[tokio::test]
    async fn store_errors_surface_as_engine_errors() {
        let (handler, _) = handler_over(Arc::new(BrokenStore), Arc::new(SystemClock));

        let err = handler.fetch_and_lock(&caller(), example_request()).await.unwrap_err();
        assert_eq!(err, FetchError::Engine("anExceptionMessage".to_string()));
    }
}
