//! Supervised background tasks.
//!
//! Fire-and-forget work (packet handling, restarts) is spawned through
//! [`Supervisor`] so that failures and panics are logged instead of lost,
//! and so the session can wait for outstanding work on shutdown.

use std::future::Future;

use tokio_util::task::TaskTracker;

use crate::errors::InvocationError;

/// Tracks every background task spawned on behalf of one session.
#[derive(Clone, Debug, Default)]
pub(crate) struct Supervisor {
    tracker: TaskTracker,
}

impl Supervisor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut`; its error or panic is logged under `name`.
    pub(crate) fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), InvocationError>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            // The inner task turns a panic into a JoinError we can report.
            match tokio::spawn(fut).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("[mtlink] Background task {name} failed: {e}"),
                Err(e) if e.is_panic() => tracing::error!("[mtlink] Background task {name} panicked"),
                Err(e) => tracing::debug!("[mtlink] Background task {name} cancelled: {e}"),
            }
        });
    }

    /// Tasks still running.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tracker.len()
    }
}
