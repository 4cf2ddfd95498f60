use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Level-triggered pause flag shared by the vision and voice loops.
///
/// Setting it does not interrupt work in flight: loops check it before they
/// start the next unit of work and wait until it is cleared. There is no
/// queue of waiters and no owner.
#[derive(Debug, Clone, Default)]
pub struct SharedSignal {
    flag: Arc<AtomicBool>,
}

impl SharedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Polls every `poll_interval` until the flag is clear.
    pub async fn wait_until_clear(&self, poll_interval: Duration) {
        while self.is_set() {
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Sets the flag and returns a guard that clears it when dropped.
    pub fn pause_guard(&self) -> PauseGuard {
        self.set();
        PauseGuard {
            signal: self.clone(),
        }
    }
}

#[must_use = "the signal is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PauseGuard {
    signal: SharedSignal,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.signal.clear();
    }
}
