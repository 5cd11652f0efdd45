use std::sync::{Arc, Mutex};

use drifter_core::types::LifecycleEvent;
use tracing::warn;

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Error returned by an event sink callback. Caught and logged by the bus,
/// never propagated into the orchestrator loop.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Consumer callback for lifecycle events (telemetry, UI, logging).
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

struct BusInner {
    senders: Vec<flume::Sender<LifecycleEvent>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

/// Fan-out for lifecycle events, built on flume channels plus a registered
/// callback list.
///
/// Each call to [`subscribe`] creates a new receiver that will receive all
/// events published after the subscription was created; disconnected
/// receivers are pruned on publish. Registered [`EventSink`]s are invoked
/// inline; their errors are caught and logged. The bus is thread-safe and
/// can be cloned cheaply.
///
/// [`subscribe`]: EventBus::subscribe
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                senders: Vec::new(),
                sinks: Vec::new(),
            })),
        }
    }

    /// Register a new channel subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<LifecycleEvent> {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.push(tx);
        rx
    }

    /// Register a callback sink.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.sinks.push(sink);
    }

    /// Publish an event to all current subscribers and sinks.
    ///
    /// Disconnected channel subscribers are automatically pruned. Sink
    /// errors are logged and swallowed.
    pub fn publish(&self, event: LifecycleEvent) {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.retain(|tx| tx.send(event.clone()).is_ok());
        for sink in &inner.sinks {
            if let Err(e) = sink.on_event(&event) {
                warn!(
                    agent_id = %event.agent_id,
                    error = %e,
                    "event sink failed"
                );
            }
        }
    }

    /// Return the number of currently active channel subscribers.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.senders.len()
    }

    /// Return the number of registered callback sinks.
    pub fn sink_count(&self) -> usize {
        let inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.sinks.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drifter_core::types::AgentState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn make_event() -> LifecycleEvent {
        LifecycleEvent {
            agent_id: Uuid::new_v4(),
            archetype: "scout".to_string(),
            from_state: AgentState::Traveling,
            to_state: AgentState::Arriving,
            node: Some("n1".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(make_event());
        bus.publish(make_event());

        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(make_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn sink_errors_do_not_propagate() {
        struct FailingSink;
        impl EventSink for FailingSink {
            fn on_event(&self, _event: &LifecycleEvent) -> Result<(), SinkError> {
                Err(SinkError("sink is broken".to_string()))
            }
        }

        let counted = Arc::new(AtomicUsize::new(0));
        struct CountingSink(Arc<AtomicUsize>);
        impl EventSink for CountingSink {
            fn on_event(&self, _event: &LifecycleEvent) -> Result<(), SinkError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let bus = EventBus::new();
        bus.register_sink(Arc::new(FailingSink));
        bus.register_sink(Arc::new(CountingSink(counted.clone())));
        assert_eq!(bus.sink_count(), 2);

        // The failing sink must not stop the counting sink from running.
        bus.publish(make_event());
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(make_event());

        let rx = bus.subscribe();
        assert_eq!(rx.try_iter().count(), 0);

        bus.publish(make_event());
        assert_eq!(rx.try_iter().count(), 1);
    }
}
