use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::plugin_system::manager::PluginManager;

/// Work marshalled onto the main loop thread.
pub type ExecuteFn = Box<dyn FnOnce(&PluginManager) + Send + 'static>;

/// Builtin events understood by the manager main loop.
pub enum ManagerEvent {
    /// Run a closure on the loop thread
    Execute(ExecuteFn),
    /// Stop the loop after the events queued before it
    Exit,
}

impl fmt::Debug for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerEvent::Execute(_) => write!(f, "ManagerEvent::Execute"),
            ManagerEvent::Exit => write!(f, "ManagerEvent::Exit"),
        }
    }
}

/// FIFO queue guarded by a condition variable.
#[derive(Debug, Default)]
pub struct ManagerEventQueue {
    events: Mutex<VecDeque<ManagerEvent>>,
    available: Condvar,
}

impl ManagerEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // Queue contents stay valid even if a pusher panicked.
    fn events(&self) -> MutexGuard<'_, VecDeque<ManagerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: ManagerEvent) {
        self.events().push_back(event);
        self.available.notify_one();
    }

    /// Pop the oldest event, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ManagerEvent> {
        let guard = self.events();
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |events| events.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop_front()
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<ManagerEvent> {
        self.events().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }
}
