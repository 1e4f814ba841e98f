//! Suspension manager: long-poll waiters keyed by topic.
//!
//! A fetch that locked nothing registers a waiter for its topics and awaits a
//! oneshot wake bounded by a timer. Register, signal and deregister each take
//! the registry mutex once, so a waiter is resolved exactly once: whichever
//! of signal and timer removes it first decides the outcome.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{TopicName, WaiterId};

/// Lifecycle of one suspended fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionState {
    /// Registered; the scheduler is running.
    Active,
    Waiting,
    ResumedOnSignal,
    ResumedOnTimeout,
    ResumedOnCancel,
}

struct WaiterEntry {
    topics: Vec<TopicName>,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct Registry {
    waiters: HashMap<WaiterId, WaiterEntry>,
    by_topic: HashMap<TopicName, HashSet<WaiterId>>,
}

impl Registry {
    fn remove(&mut self, id: WaiterId) -> Option<WaiterEntry> {
        let entry = self.waiters.remove(&id)?;
        for topic in &entry.topics {
            if let Some(ids) = self.by_topic.get_mut(topic) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_topic.remove(topic);
                }
            }
        }
        Some(entry)
    }
}

/// Registry of suspended fetches for one engine.
#[derive(Default)]
pub struct SuspensionManager {
    registry: Mutex<Registry>,
}

impl SuspensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `topics`. The returned waiter deregisters on drop.
    pub fn register(self: &Arc<Self>, id: WaiterId, topics: Vec<TopicName>) -> Waiter {
        let (wake, rx) = oneshot::channel();
        {
            let mut registry = self.registry.lock();
            for topic in &topics {
                registry.by_topic.entry(topic.clone()).or_default().insert(id);
            }
            registry.waiters.insert(id, WaiterEntry { topics, wake });
        }
        Waiter {
            id,
            manager: Arc::clone(self),
            rx,
            state: SuspensionState::Active,
        }
    }

    /// Wakes every waiter registered for `topic`. Returns how many were woken.
    pub fn signal(&self, topic: &TopicName) -> usize {
        let woken: Vec<WaiterEntry> = {
            let mut registry = self.registry.lock();
            let ids: Vec<WaiterId> = registry
                .by_topic
                .get(topic)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            ids.into_iter().filter_map(|id| registry.remove(id)).collect()
        };

        // Send outside the lock.
        let count = woken.len();
        for entry in woken {
            let _ = entry.wake.send(());
        }
        if count > 0 {
            debug!(%topic, woken = count, "signaled waiters");
        }
        count
    }

    /// Number of registered waiters.
    pub fn waiting(&self) -> usize {
        self.registry.lock().waiters.len()
    }

    /// True if the waiter was still registered.
    fn deregister(&self, id: WaiterId) -> bool {
        self.registry.lock().remove(id).is_some()
    }
}

/// One registered fetch.
pub struct Waiter {
    id: WaiterId,
    manager: Arc<SuspensionManager>,
    rx: oneshot::Receiver<()>,
    state: SuspensionState,
}

impl Waiter {
    /// Suspends until signaled or until `wake_at`.
    ///
    /// When the timer fires after a signal already took the waiter out of the
    /// registry, the signal wins.
    pub async fn wait_until(&mut self, wake_at: Instant) -> SuspensionState {
        self.state = SuspensionState::Waiting;
        let resumed = match tokio::time::timeout_at(wake_at, &mut self.rx).await {
            Ok(_) => SuspensionState::ResumedOnSignal,
            Err(_) if self.manager.deregister(self.id) => SuspensionState::ResumedOnTimeout,
            Err(_) => SuspensionState::ResumedOnSignal,
        };
        debug!(waiter_id = %self.id, state = ?resumed, "waiter resumed");
        self.state = resumed;
        resumed
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.manager.deregister(self.id) && self.state == SuspensionState::Waiting {
            debug!(
                waiter_id = %self.id,
                state = ?SuspensionState::ResumedOnCancel,
                "waiter cancelled"
            );
        }
    }
}
