//! Ports: the seams to storage, identity, time and id generation.
//!
//! The app layer only talks to these traits; `impls` carries the in-memory
//! versions used by the server binary and the tests.

pub mod clock;
pub mod id_generator;
pub mod identity;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::identity::IdentityService;
pub use self::task_store::{TaskFailure, TaskStore};
