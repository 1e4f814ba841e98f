//! Application layer: composes the ports into the fetch-and-lock flow.
//!
//! - **matcher**: subscriptions to candidate tasks
//! - **scheduler**: ordering plus compare-and-set locking
//! - **suspension**: long-poll waiters keyed by topic
//! - **handler**: validation, long-poll loop, variable projection
//! - **service**: lifecycle operations that wake waiters
//! - **auth**: credential check and tenant visibility
//! - **builder**: engine wiring with fail-fast checks

pub mod auth;
pub mod builder;
pub mod handler;
pub mod matcher;
pub mod scheduler;
pub mod service;
pub mod suspension;

pub use self::auth::{ADMIN_GROUP, Authentication, Credentials, authenticate};
pub use self::builder::{BuildError, Engine, EngineBuilder, EngineRegistry, EngineRegistryBuilder};
pub use self::handler::{FetchAndLockHandler, TimeoutBounds};
pub use self::matcher::{Candidate, TopicMatcher};
pub use self::scheduler::{LockScheduler, LockedCandidate};
pub use self::service::ExternalTaskService;
pub use self::suspension::{SuspensionManager, SuspensionState, Waiter};
