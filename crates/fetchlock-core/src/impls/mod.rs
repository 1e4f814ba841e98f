//! In-memory implementations of the ports.
//!
//! Used by the server binary and by tests; a database-backed store would
//! live in its own crate behind the same `TaskStore` trait.

pub mod memory_identity;
pub mod memory_store;

pub use self::memory_identity::{InMemoryIdentityService, UserEntry};
pub use self::memory_store::InMemoryTaskStore;
