//! Topic matcher: pairs lockable tasks with the subscription that wants them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::app::auth::Authentication;
use crate::domain::{ExternalTask, FetchError, StoreError, TopicName, TopicSubscription};
use crate::ports::TaskStore;

/// A lockable task tagged with the index of the subscription that matched it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub task: ExternalTask,
    pub subscription: usize,
}

/// Read-only query composition over a `TaskStore`.
pub struct TopicMatcher<'a> {
    subscriptions: &'a [TopicSubscription],
    by_topic: HashMap<TopicName, usize>,
}

impl<'a> TopicMatcher<'a> {
    /// Fails if two subscriptions name the same topic; which lock duration
    /// would apply is ambiguous, so the request is rejected.
    pub fn new(subscriptions: &'a [TopicSubscription]) -> Result<Self, FetchError> {
        let mut by_topic = HashMap::with_capacity(subscriptions.len());
        for (index, subscription) in subscriptions.iter().enumerate() {
            let topic = TopicName::new(subscription.topic_name.as_str());
            if by_topic.insert(topic, index).is_some() {
                return Err(FetchError::Validation(format!(
                    "Topic '{}' is subscribed more than once",
                    subscription.topic_name
                )));
            }
        }
        Ok(Self {
            subscriptions,
            by_topic,
        })
    }

    pub fn topics(&self) -> Vec<TopicName> {
        self.subscriptions
            .iter()
            .map(|s| TopicName::new(s.topic_name.as_str()))
            .collect()
    }

    pub fn subscription(&self, index: usize) -> &TopicSubscription {
        &self.subscriptions[index]
    }

    /// Lockable tasks of the subscribed topics that pass the subscription
    /// filters and the caller's tenant check.
    pub async fn find_candidates(
        &self,
        store: &dyn TaskStore,
        authentication: &Authentication,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, StoreError> {
        let tasks = store.find_lockable(&self.topics(), now).await?;
        Ok(tasks
            .into_iter()
            .filter(|task| authentication.can_access(task))
            .filter_map(|task| {
                let subscription = *self.by_topic.get(&task.topic)?;
                self.subscriptions[subscription]
                    .filters
                    .matches(&task)
                    .then_some(Candidate { task, subscription })
            })
            .collect())
    }
}
