//! Cancellable one-shot refresh timer.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Holds at most one pending timer task. Arming replaces (and aborts) the
/// previous one.
#[derive(Debug, Default)]
pub struct RefreshTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay`, cancelling any timer armed before.
    ///
    /// `on_fire` receives the generation it was armed with; use
    /// [`RefreshTimer::is_current`] to drop fires that raced a re-arm.
    /// Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&self, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.handle.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation).await;
        });

        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }

        debug!(generation, delay_ms = delay.as_millis() as u64, "refresh timer armed");
        generation
    }

    /// Abort the pending timer, if any.
    pub fn cancel(&self) {
        let mut slot = self.handle.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = slot.take() {
            previous.abort();
            debug!("refresh timer cancelled");
        }
    }

    /// Whether `generation` is still the most recently armed timer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Whether a timer is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
