use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal — cooperative shutdown coordination
// ---------------------------------------------------------------------------

/// Broadcast-based shutdown coordinator.
///
/// The daemon loop registers interest by calling `subscribe()`, then
/// `select!`s on the returned receiver alongside its interval tick, so
/// cancellation is only observed between cycles, never mid-cycle.
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
/// let mut rx = shutdown.subscribe();
///
/// tokio::select! {
///     _ = rx.recv() => { /* graceful exit */ }
///     _ = interval.tick() => { /* run one cycle */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    /// Broadcast sender — triggers shutdown for all subscribers.
    trigger: broadcast::Sender<()>,
    /// Atomic flag for cheap polling.
    shutting_down: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Trigger shutdown for all subscribers. Subsequent calls are no-ops.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown signal triggered");
            let _ = self.trigger.send(());
        } else {
            warn!("shutdown already triggered");
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_subscribers() {
        let shutdown = ShutdownSignal::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_shutting_down());
        shutdown.trigger();
        assert!(shutdown.is_shutting_down());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn double_trigger_is_harmless() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_shutting_down());
    }
}
