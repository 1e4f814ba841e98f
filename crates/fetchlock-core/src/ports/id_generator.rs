//! IdGenerator port.
//!
//! IDs are ULIDs stamped with the injected clock's time, so ordering by id
//! follows creation order even under a `FixedClock`.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{TaskId, WaiterId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_waiter_id(&self) -> WaiterId;
}

/// ULID generator over a `Clock`.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn generate_waiter_id(&self) -> WaiterId {
        WaiterId::from(self.next())
    }
}
