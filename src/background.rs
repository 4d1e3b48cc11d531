//! Background task registry.
//!
//! Turn tasks are spawned off the request path so the SSE response can
//! stream while aggregation and persistence run. Registering them here lets
//! graceful shutdown wait for in-flight persistence instead of dropping it.

// std::sync::Mutex: the lock is never held across an .await point.
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Registry of spawned tasks awaited on shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and track its handle. Finished handles are pruned on the
    /// way in so the registry stays bounded by in-flight work.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Wait for every tracked task to complete.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().expect("mutex poisoned"));
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "waiting for background tasks");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked");
            }
        }
    }

    /// Number of tasks still running.
    pub fn pending_count(&self) -> usize {
        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.len()
    }
}
