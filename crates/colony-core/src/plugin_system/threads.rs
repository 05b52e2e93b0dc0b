//! # Thread coordination
//!
//! Plugins declaring the `main` or `thread` capability run their lifecycle
//! hooks on a dedicated worker thread. The manager hands a [`ThreadEvent`] to
//! the worker and blocks on a per-plugin [`Semaphore`] until the hook is done.
//! The worker runs each hook on a short-lived sub-thread so a panicking or
//! hanging hook cannot wedge the coordination loop: a panic is detected
//! because the release counter did not move. Unload side hooks are abandoned
//! once the unload timeout expires; load side hooks are waited for.
//!
//! The module also holds the reentrant [`RetrieveLock`] guarding
//! load-triggering plugin retrieval.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::plugin_system::traits::{HookResult, PluginContext, PluginError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle hooks routed through a plugin worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Load,
    LazyLoad,
    EndLoad,
    Unload,
    EndUnload,
}

impl HookKind {
    pub fn name(&self) -> &'static str {
        match self {
            HookKind::Load => "load_plugin",
            HookKind::LazyLoad => "lazy_load_plugin",
            HookKind::EndLoad => "end_load_plugin",
            HookKind::Unload => "unload_plugin",
            HookKind::EndUnload => "end_unload_plugin",
        }
    }

    /// How long the worker waits for this hook before abandoning it.
    ///
    /// `None` means wait until the hook returns or panics.
    pub fn deadline(&self, unload_timeout: Duration) -> Option<Duration> {
        match self {
            HookKind::Unload | HookKind::EndUnload => Some(unload_timeout),
            HookKind::Load | HookKind::LazyLoad | HookKind::EndLoad => None,
        }
    }

    /// Call the matching user hook of the context's plugin.
    pub fn invoke(&self, ctx: &PluginContext) -> HookResult {
        let plugin = ctx.handle().plugin();
        match self {
            HookKind::Load => plugin.load_plugin(ctx),
            HookKind::LazyLoad => plugin.lazy_load_plugin(ctx),
            HookKind::EndLoad => plugin.end_load_plugin(ctx),
            HookKind::Unload => plugin.unload_plugin(ctx),
            HookKind::EndUnload => plugin.end_unload_plugin(ctx),
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Message understood by a plugin worker.
pub enum ThreadEvent {
    Hook { kind: HookKind, ctx: PluginContext },
    Exit,
}

impl fmt::Debug for ThreadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadEvent::Hook { kind, ctx } => write!(f, "ThreadEvent::Hook({}, {})", kind, ctx.id()),
            ThreadEvent::Exit => write!(f, "ThreadEvent::Exit"),
        }
    }
}

// --- Semaphore ---

#[derive(Debug)]
struct SemaphoreState {
    permits: usize,
    releases: u64,
}

/// Counting semaphore that also counts its releases.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState { permits, releases: 0 }),
            available: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let guard = lock(&self.state);
        let mut guard = self
            .available
            .wait_while(guard, |state| state.permits == 0)
            .unwrap_or_else(PoisonError::into_inner);
        guard.permits -= 1;
    }

    pub fn release(&self) {
        let mut guard = lock(&self.state);
        guard.permits += 1;
        guard.releases += 1;
        self.available.notify_one();
    }

    pub fn release_count(&self) -> u64 {
        lock(&self.state).releases
    }

    pub fn permits(&self) -> usize {
        lock(&self.state).permits
    }
}

// --- Worker queue ---

#[derive(Debug, Default)]
struct ThreadQueue {
    events: Mutex<VecDeque<ThreadEvent>>,
    available: Condvar,
}

impl ThreadQueue {
    fn push(&self, event: ThreadEvent) {
        lock(&self.events).push_back(event);
        self.available.notify_one();
    }

    fn pop(&self) -> ThreadEvent {
        let guard = lock(&self.events);
        let mut guard = self
            .available
            .wait_while(guard, |events| events.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop_front().unwrap_or(ThreadEvent::Exit)
    }
}

// --- Plugin worker ---

/// Long-lived worker thread of one threaded plugin instance.
pub struct PluginThread {
    plugin_id: String,
    queue: Arc<ThreadQueue>,
    semaphore: Arc<Semaphore>,
    outcome: Arc<Mutex<Option<HookResult>>>,
    /// Serializes callers so each one reads its own outcome
    calls: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PluginThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginThread")
            .field("plugin_id", &self.plugin_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PluginThread {
    /// Start the worker of `plugin_id`.
    pub fn spawn(plugin_id: &str, unload_timeout: Duration) -> std::io::Result<Self> {
        let queue = Arc::new(ThreadQueue::default());
        let semaphore = Arc::new(Semaphore::new(1));
        let outcome = Arc::new(Mutex::new(None));

        let worker = {
            let plugin_id = plugin_id.to_string();
            let queue = Arc::clone(&queue);
            let semaphore = Arc::clone(&semaphore);
            let outcome = Arc::clone(&outcome);
            thread::Builder::new()
                .name(format!("colony-{}", plugin_id))
                .spawn(move || worker_loop(&plugin_id, &queue, &semaphore, &outcome, unload_timeout))?
        };
        log::debug!("Started worker thread for plugin '{}'", plugin_id);

        Ok(Self {
            plugin_id: plugin_id.to_string(),
            queue,
            semaphore,
            outcome,
            calls: Mutex::new(()),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Run `kind` on the worker and block until it completes.
    pub fn run_hook(&self, kind: HookKind, ctx: PluginContext) -> HookResult {
        if !self.is_running() {
            return Err(PluginError::ExecutionError(format!(
                "worker thread of '{}' is not running",
                self.plugin_id
            )));
        }
        let _call = lock(&self.calls);
        self.semaphore.acquire();
        self.queue.push(ThreadEvent::Hook { kind, ctx });
        self.semaphore.acquire();
        let outcome = lock(&self.outcome).take();
        self.semaphore.release();
        outcome.unwrap_or_else(|| {
            Err(PluginError::Panicked(format!("{} produced no outcome", kind)))
        })
    }

    /// Ask the worker to exit and join it.
    pub fn shutdown(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        self.queue.push(ThreadEvent::Exit);
        if worker.join().is_err() {
            log::error!("Worker thread of plugin '{}' panicked", self.plugin_id);
        }
        log::debug!("Stopped worker thread for plugin '{}'", self.plugin_id);
    }
}

fn worker_loop(
    plugin_id: &str,
    queue: &ThreadQueue,
    semaphore: &Arc<Semaphore>,
    outcome: &Arc<Mutex<Option<HookResult>>>,
    unload_timeout: Duration,
) {
    let mut pending: Vec<JoinHandle<()>> = Vec::new();
    loop {
        match queue.pop() {
            ThreadEvent::Hook { kind, ctx } => {
                run_on_sub_thread(plugin_id, kind, ctx, semaphore, outcome, unload_timeout, &mut pending);
                pending.retain(|handle| !handle.is_finished());
            }
            ThreadEvent::Exit => {
                join_pending(plugin_id, pending, unload_timeout);
                return;
            }
        }
    }
}

fn run_on_sub_thread(
    plugin_id: &str,
    kind: HookKind,
    ctx: PluginContext,
    semaphore: &Arc<Semaphore>,
    outcome: &Arc<Mutex<Option<HookResult>>>,
    unload_timeout: Duration,
    pending: &mut Vec<JoinHandle<()>>,
) {
    let snapshot = semaphore.release_count();
    let abandoned = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let spawned = {
        let semaphore = Arc::clone(semaphore);
        let outcome = Arc::clone(outcome);
        let abandoned = Arc::clone(&abandoned);
        thread::Builder::new()
            .name(format!("colony-{}-{}", plugin_id, kind))
            .spawn(move || {
                let result = kind.invoke(&ctx);
                // Publishing and abandoning are decided under the outcome lock.
                let mut slot = lock(&outcome);
                if !abandoned.load(Ordering::SeqCst) {
                    *slot = Some(result);
                    semaphore.release();
                    drop(slot);
                    let _ = done_tx.send(());
                }
            })
    };

    let sub_thread = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            *lock(outcome) = Some(Err(PluginError::ExecutionError(format!(
                "could not spawn hook thread: {}",
                e
            ))));
            semaphore.release();
            return;
        }
    };

    let deadline = kind.deadline(unload_timeout);
    let waited = match deadline {
        Some(deadline) => done_rx.recv_timeout(deadline),
        None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    let hanging = match waited {
        // A disconnect without message means the hook panicked.
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if sub_thread.join().is_err() {
                log::error!("Hook {} of plugin '{}' panicked", kind, plugin_id);
            }
            None
        }
        Err(RecvTimeoutError::Timeout) => Some(sub_thread),
    };

    let mut slot = lock(outcome);
    if let Some(sub_thread) = hanging {
        abandoned.store(true, Ordering::SeqCst);
        if semaphore.release_count() == snapshot {
            log::error!(
                "Hook {} of plugin '{}' did not finish within {:?}",
                kind,
                plugin_id,
                unload_timeout
            );
        }
        pending.push(sub_thread);
    }
    if semaphore.release_count() == snapshot {
        log::warn!(
            "Hook {} of plugin '{}' ended without releasing its semaphore, forcing release",
            kind,
            plugin_id
        );
        if slot.is_none() {
            *slot = Some(Err(PluginError::Panicked(format!(
                "{} of '{}' did not complete",
                kind, plugin_id
            ))));
        }
        semaphore.release();
    }
}

fn join_pending(plugin_id: &str, pending: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for handle in pending {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            log::error!("Detaching hook thread of plugin '{}' still running at exit", plugin_id);
        }
    }
}

// --- Retrieve lock ---

/// Reentrant lock taken on the load-triggering path of plugin retrieval.
#[derive(Debug, Default)]
pub struct RetrieveLock {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl RetrieveLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the current thread owns the lock; nested calls succeed immediately.
    pub fn lock(&self) -> RetrieveGuard<'_> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((thread_id, depth)) if *thread_id == me => {
                    *depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self.released.wait(owner).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        RetrieveGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.owner).is_some()
    }
}

#[must_use]
pub struct RetrieveGuard<'a> {
    lock: &'a RetrieveLock,
}

impl Drop for RetrieveGuard<'_> {
    fn drop(&mut self) {
        let mut owner = lock(&self.lock.owner);
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.lock.released.notify_all();
            }
        }
    }
}
