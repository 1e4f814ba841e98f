//! Fetch request, topic subscriptions, and the locked task view.
//!
//! `FetchRequest` mirrors the wire contract field for field; the handler
//! validates it before anything touches the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ExternalTask, VariableView};

/// Filters a subscription may narrow its topic with.
///
/// Every present filter has to match. The two tenant filters combine with
/// "or": a task passes if it belongs to one of `tenant_id_in` or, with
/// `without_tenant_id`, has no tenant at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicFilters {
    pub business_key: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub tenant_id_in: Option<Vec<String>>,
    pub without_tenant_id: bool,
}

impl TopicFilters {
    pub fn matches(&self, task: &ExternalTask) -> bool {
        let ctx = &task.context;
        if !matches_opt(&self.business_key, &ctx.business_key)
            || !matches_opt(&self.process_definition_id, &ctx.process_definition_id)
            || !matches_opt(&self.process_definition_key, &ctx.process_definition_key)
        {
            return false;
        }

        if self.tenant_id_in.is_none() && !self.without_tenant_id {
            return true;
        }
        let in_listed_tenant = match (&self.tenant_id_in, &ctx.tenant_id) {
            (Some(tenants), Some(tenant)) => tenants.iter().any(|t| t == tenant),
            _ => false,
        };
        in_listed_tenant || (self.without_tenant_id && ctx.tenant_id.is_none())
    }
}

fn matches_opt(expected: &Option<String>, actual: &Option<String>) -> bool {
    match expected {
        Some(expected) => actual.as_deref() == Some(expected.as_str()),
        None => true,
    }
}

/// One `(topic, lock duration, filters)` entry of a fetch request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    #[serde(default)]
    pub topic_name: String,
    /// Milliseconds; must be positive.
    #[serde(default)]
    pub lock_duration: i64,
    /// `None` fetches every variable.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub deserialize_values: bool,
    #[serde(flatten)]
    pub filters: TopicFilters,
}

impl TopicSubscription {
    pub fn new(topic_name: impl Into<String>, lock_duration: i64) -> Self {
        Self {
            topic_name: topic_name.into(),
            lock_duration,
            ..Self::default()
        }
    }

    pub fn with_variables(mut self, names: &[&str]) -> Self {
        self.variables = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn deserialized(mut self) -> Self {
        self.deserialize_values = true;
        self
    }

    pub fn with_filters(mut self, filters: TopicFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// A worker's poll for tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub max_tasks: i64,
    #[serde(default)]
    pub use_priority: bool,
    /// Milliseconds to hold the request open; `None` answers immediately.
    #[serde(default)]
    pub async_response_timeout: Option<i64>,
    #[serde(default)]
    pub topics: Vec<TopicSubscription>,
}

impl FetchRequest {
    pub fn new(worker_id: impl Into<String>, max_tasks: i64) -> Self {
        Self {
            worker_id: worker_id.into(),
            max_tasks,
            ..Self::default()
        }
    }

    pub fn topic(mut self, subscription: TopicSubscription) -> Self {
        self.topics.push(subscription);
        self
    }

    pub fn use_priority(mut self, use_priority: bool) -> Self {
        self.use_priority = use_priority;
        self
    }

    pub fn timeout(mut self, millis: i64) -> Self {
        self.async_response_timeout = Some(millis);
        self
    }
}

/// Snapshot of a task at lock time plus the variables its subscription asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedExternalTask {
    pub task: ExternalTask,
    pub variables: BTreeMap<String, VariableView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionContext, TaskId};
    use chrono::Utc;
    use rstest::rstest;
    use ulid::Ulid;

    fn task_with(tenant: Option<&str>, business_key: Option<&str>) -> ExternalTask {
        let mut task = ExternalTask::new(TaskId::from_ulid(Ulid::new()), "t".into(), Utc::now());
        task.context = ExecutionContext {
            tenant_id: tenant.map(str::to_string),
            business_key: business_key.map(str::to_string),
            process_definition_key: Some("invoice".to_string()),
            ..ExecutionContext::default()
        };
        task
    }

    #[test]
    fn empty_filters_match_everything() {
        assert!(TopicFilters::default().matches(&task_with(Some("a"), None)));
        assert!(TopicFilters::default().matches(&task_with(None, None)));
    }

    #[rstest]
    #[case::listed_tenant(Some(vec!["a"]), false, Some("a"), true)]
    #[case::other_tenant(Some(vec!["a"]), false, Some("b"), false)]
    #[case::no_tenant_not_listed(Some(vec!["a"]), false, None, false)]
    #[case::without_tenant(None, true, None, true)]
    #[case::without_tenant_rejects_tenant(None, true, Some("a"), false)]
    #[case::either(Some(vec!["a"]), true, None, true)]
    fn tenant_filters(
        #[case] tenant_id_in: Option<Vec<&str>>,
        #[case] without_tenant_id: bool,
        #[case] task_tenant: Option<&str>,
        #[case] expected: bool,
    ) {
        let filters = TopicFilters {
            tenant_id_in: tenant_id_in.map(|v| v.into_iter().map(str::to_string).collect()),
            without_tenant_id,
            ..TopicFilters::default()
        };
        assert_eq!(filters.matches(&task_with(task_tenant, None)), expected);
    }

    #[test]
    fn business_key_and_definition_key_must_match() {
        let filters = TopicFilters {
            business_key: Some("order-7".to_string()),
            process_definition_key: Some("invoice".to_string()),
            ..TopicFilters::default()
        };
        assert!(filters.matches(&task_with(None, Some("order-7"))));
        assert!(!filters.matches(&task_with(None, Some("order-8"))));
        assert!(!filters.matches(&task_with(None, None)));
    }

    #[test]
    fn request_reads_wire_json() {
        let request: FetchRequest = serde_json::from_value(serde_json::json!({
            "workerId": "aWorkerId",
            "maxTasks": 5,
            "usePriority": true,
            "topics": [{
                "topicName": "aTopicName",
                "lockDuration": 12354,
                "variables": ["aVariableName"],
                "tenantIdIn": ["t1"]
            }]
        }))
        .unwrap();

        assert_eq!(request.worker_id, "aWorkerId");
        assert_eq!(request.async_response_timeout, None);
        let topic = &request.topics[0];
        assert_eq!(topic.lock_duration, 12354);
        assert!(!topic.deserialize_values);
        assert_eq!(topic.variables.as_deref(), Some(&["aVariableName".to_string()][..]));
        assert_eq!(topic.filters.tenant_id_in, Some(vec!["t1".to_string()]));
    }
}
