use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;
use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Runs the orchestrator cycle on a fixed interval in a background task.
///
/// `start()` and `stop()` are idempotent. Shutdown is observed between
/// cycles only: `stop()` triggers the signal and then awaits the loop task,
/// so it returns only after any in-flight cycle has finished. An interrupted
/// run leaves agents in their pre-cycle state.
pub struct Daemon {
    orchestrator: Arc<Orchestrator>,
    cycle_interval: Duration,
    shutdown: ShutdownSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Daemon {
    pub fn new(orchestrator: Arc<Orchestrator>, cycle_interval: Duration) -> Self {
        Self {
            orchestrator,
            cycle_interval,
            shutdown: ShutdownSignal::new(),
            handle: Mutex::new(None),
        }
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Whether the background loop is currently running.
    pub async fn is_running(&self) -> bool {
        let handle = self.handle.lock().await;
        handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Spawn the cycle loop. A second call while running is a no-op, as is
    /// starting after shutdown has been triggered.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            warn!("daemon already running");
            return;
        }
        if self.shutdown.is_shutting_down() {
            warn!("daemon already shut down; not restarting");
            return;
        }

        let orchestrator = self.orchestrator.clone();
        let interval = self.cycle_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(cycle_secs = interval.as_secs(), "daemon starting cycle loop");

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Consume the immediate first tick so the loop waits a full
            // interval before the first cycle.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = orchestrator.tick().await;
                        debug!(
                            processed = report.processed,
                            transitions = report.transitions,
                            closed = report.closed,
                            "cycle report"
                        );
                    }
                    _ = shutdown_rx.recv() => {
                        info!("shutdown signal received, stopping cycle loop");
                        break;
                    }
                }
            }
        }));
    }

    /// Trigger shutdown and wait for the loop (and any in-flight cycle) to
    /// finish. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handle = {
            let mut guard = self.handle.lock().await;
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "daemon loop task failed");
            }
        }
        info!("daemon stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use drifter_core::config::OrchestratorConfig;
    use drifter_core::types::NodeSnapshot;
    use drifter_engine::registry::{NodeStatusProvider, ProviderError};

    struct EmptyProvider;

    #[async_trait::async_trait]
    impl NodeStatusProvider for EmptyProvider {
        async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, ProviderError> {
            Ok(vec![])
        }
    }

    fn make_daemon(interval_ms: u64) -> Daemon {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(EmptyProvider),
            OrchestratorConfig::default(),
        ));
        Daemon::new(orchestrator, Duration::from_millis(interval_ms))
    }

    #[tokio::test]
    async fn start_and_stop_cleanly() {
        let daemon = make_daemon(10);
        daemon.start().await;
        assert!(daemon.is_running().await);

        tokio::time::sleep(Duration::from_millis(35)).await;
        daemon.stop().await;
        assert!(!daemon.is_running().await);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let daemon = make_daemon(10);
        daemon.start().await;
        daemon.start().await; // no-op
        assert!(daemon.is_running().await);
        daemon.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let daemon = make_daemon(10);
        daemon.start().await;
        daemon.stop().await;
        daemon.stop().await; // no-op
        assert!(!daemon.is_running().await);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let daemon = make_daemon(10);
        daemon.stop().await;
        assert!(!daemon.is_running().await);
    }

    #[tokio::test]
    async fn external_shutdown_handle_stops_loop() {
        let daemon = make_daemon(10);
        daemon.start().await;

        let handle = daemon.shutdown_handle();
        handle.trigger();
        daemon.stop().await;

        assert!(!daemon.is_running().await);
        // The orchestrator is still queryable after the loop exits.
        let status = daemon.orchestrator().status().await;
        assert_eq!(status.active_count, 0);
    }

    #[tokio::test]
    async fn no_restart_after_shutdown() {
        let daemon = make_daemon(10);
        daemon.start().await;
        daemon.stop().await;
        daemon.start().await;
        assert!(!daemon.is_running().await);
    }
}
