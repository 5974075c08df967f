//! One-shot delayed actions owned by the node.
//!
//! Token seeding, token passes and grace-window closes all run here. Every
//! timer also watches the shutdown signal, and [`Timers::shutdown`] aborts
//! and joins whatever is still pending, so nothing outlives the node.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

pub(crate) struct Timers {
    set: Mutex<JoinSet<()>>,
    shutdown: watch::Receiver<bool>,
}

impl Timers {
    pub(crate) fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            set: Mutex::new(JoinSet::new()),
            shutdown,
        }
    }

    fn set(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` after `delay` unless the node shuts down first.
    pub(crate) fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if *self.shutdown.borrow() {
            return;
        }
        let mut shutdown = self.shutdown.clone();
        let mut set = self.set();
        // Reap finished timers.
        while set.try_join_next().is_some() {}
        set.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => action(),
                _ = shutdown.changed() => {}
            }
        });
    }

    /// Timers not yet reaped.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.set().len()
    }

    /// Abort and join every pending timer.
    pub(crate) async fn shutdown(&self) {
        let mut set = std::mem::take(&mut *self.set());
        set.shutdown().await;
    }
}
