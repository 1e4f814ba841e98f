//! Request and response bodies of the REST surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fetchlock_core::domain::{LockedExternalTask, VariableView};
use fetchlock_core::ports::TaskFailure;

/// Wire format of `lockExpirationTime`, e.g. `2024-01-31T10:15:30.123+0000`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

pub fn format_date(at: DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedExternalTaskDto {
    pub id: String,
    pub topic_name: String,
    pub worker_id: Option<String>,
    pub lock_expiration_time: Option<String>,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub activity_id: Option<String>,
    pub activity_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub tenant_id: Option<String>,
    pub business_key: Option<String>,
    pub retries: Option<u32>,
    pub error_message: Option<String>,
    pub priority: i64,
    pub variables: BTreeMap<String, VariableView>,
}

impl From<LockedExternalTask> for LockedExternalTaskDto {
    fn from(locked: LockedExternalTask) -> Self {
        let LockedExternalTask { task, variables } = locked;
        let worker_id = task.worker_id().map(str::to_string);
        let lock_expiration_time = task.lock_expiration().map(format_date);
        let ctx = task.context;
        Self {
            id: task.id.to_string(),
            topic_name: task.topic.to_string(),
            worker_id,
            lock_expiration_time,
            process_instance_id: ctx.process_instance_id,
            execution_id: ctx.execution_id,
            activity_id: ctx.activity_id,
            activity_instance_id: ctx.activity_instance_id,
            process_definition_id: ctx.process_definition_id,
            process_definition_key: ctx.process_definition_key,
            tenant_id: ctx.tenant_id,
            business_key: ctx.business_key,
            retries: task.retries,
            error_message: task.error_message,
            priority: task.priority,
            variables,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteTaskDto {
    pub worker_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandleFailureDto {
    pub worker_id: String,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub retries: u32,
    pub retry_timeout: i64,
}

impl From<HandleFailureDto> for TaskFailure {
    fn from(dto: HandleFailureDto) -> Self {
        Self {
            worker_id: dto.worker_id,
            error_message: dto.error_message,
            error_details: dto.error_details,
            retries: dto.retries,
            retry_timeout: dto.retry_timeout,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendLockDto {
    pub worker_id: String,
    pub new_duration: i64,
}
