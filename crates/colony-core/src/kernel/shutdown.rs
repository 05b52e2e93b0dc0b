//! Forced termination when an unload does not finish in time.
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::kernel::constants::KILL_EXIT_CODE;

/// What to do once the unload timeout expired; receives the exit code.
pub type KillAction = Arc<dyn Fn(i32) + Send + Sync>;

/// Exit the process.
pub fn default_kill_action() -> KillAction {
    Arc::new(|code| std::process::exit(code))
}

/// Watchdog armed for the duration of a system unload.
///
/// Disarming (or dropping) the timer before `timeout` elapses cancels it.
/// Otherwise an error is logged and the kill action runs with
/// [`KILL_EXIT_CODE`].
pub struct KillTimer {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for KillTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillTimer")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

impl KillTimer {
    pub fn arm(timeout: Duration, action: KillAction) -> std::io::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("colony-kill-timer".to_string())
            .spawn(move || match cancelled.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    log::error!(
                        "Plugin system did not unload within {:?}, terminating with exit code {}",
                        timeout,
                        KILL_EXIT_CODE
                    );
                    action(KILL_EXIT_CODE);
                }
            })?;
        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    /// Cancel the timer and wait for its thread.
    pub fn disarm(mut self) {
        self.cancel_and_join();
    }

    fn cancel_and_join(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The watchdog may already have fired and dropped its receiver.
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Kill timer thread panicked");
            }
        }
    }
}

impl Drop for KillTimer {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}
