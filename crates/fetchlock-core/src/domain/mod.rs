//! Domain model: ids, external tasks, fetch requests, typed variables, errors.

pub mod errors;
pub mod fetch;
pub mod ids;
pub mod task;
pub mod variables;

pub use self::errors::{AuthError, FetchError, StoreError};
pub use self::fetch::{FetchRequest, LockedExternalTask, TopicFilters, TopicSubscription};
pub use self::ids::{ParseIdError, TaskId, WaiterId};
pub use self::task::{
    ExecutionContext, ExternalTask, NewExternalTask, TaskLock, TopicName, expiry_after,
};
pub use self::variables::{
    SerializedObject, TypedValue, VariableError, VariableMap, VariableView, project_variables,
};
