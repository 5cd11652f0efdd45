use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use drifter_core::clock::{Clock, SystemClock};
use drifter_core::config::OrchestratorConfig;
use drifter_core::types::{
    Agent, AgentArchetype, AgentPayload, AgentState, LifecycleEvent, Node, OrchestratorStatus,
};
use drifter_engine::admission;
use drifter_engine::archetype::ArchetypeRegistry;
use drifter_engine::pool::{AgentPool, PoolError};
use drifter_engine::registry::{NodeRegistry, NodeStatusProvider};
use drifter_engine::routing::{PolicyRouter, Router};
use drifter_engine::state_machine::{self, AgentEvent, StateMachineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::events::{EventBus, EventSink};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Control API errors. These surface synchronously to callers and are never
/// retried automatically; nothing inside the cycle loop propagates as fatal.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown archetype: `{0}`")]
    UnknownArchetype(String),
    #[error("unknown node: `{0}`")]
    UnknownNode(String),
    #[error("active agent capacity reached ({0})")]
    AtCapacity(usize),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Summary of a single orchestration cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    /// Snapshot entries merged from the provider this cycle.
    pub refreshed_nodes: usize,
    /// Active agents processed.
    pub processed: usize,
    /// State transitions observed (== lifecycle events emitted).
    pub transitions: usize,
    /// Agents moved to the completed ring.
    pub closed: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives the drift-and-landing cycle over the node registry and agent pool.
///
/// Callable single-shot via [`tick`] (deterministic with a [`ManualClock`]
/// and seeded router) or continuously via the daemon loop. The registry and
/// the pool are guarded by independent mutexes and are never locked
/// simultaneously: agents are stepped against a cloned node snapshot and
/// landing effects are applied after the pool lock is dropped.
///
/// [`tick`]: Orchestrator::tick
/// [`ManualClock`]: drifter_core::clock::ManualClock
pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    router: Arc<dyn Router>,
    provider: Arc<dyn NodeStatusProvider>,
    archetypes: ArchetypeRegistry,
    registry: Mutex<NodeRegistry>,
    pool: Mutex<AgentPool>,
    bus: EventBus,
}

impl Orchestrator {
    /// Create an orchestrator with the production clock, an entropy-seeded
    /// policy router, and the built-in archetypes.
    pub fn new(provider: Arc<dyn NodeStatusProvider>, config: OrchestratorConfig) -> Self {
        let registry = NodeRegistry::new(config.receptive_floor);
        let pool = AgentPool::new(config.completed_ring_cap, config.max_active_agents);
        Self {
            config,
            clock: Arc::new(SystemClock),
            router: Arc::new(PolicyRouter::new()),
            provider,
            archetypes: ArchetypeRegistry::with_builtins(),
            registry: Mutex::new(registry),
            pool: Mutex::new(pool),
            bus: EventBus::new(),
        }
    }

    /// Substitute the clock (useful for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute the router (useful for testing).
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    /// Substitute the archetype registry.
    pub fn with_archetypes(mut self, archetypes: ArchetypeRegistry) -> Self {
        self.archetypes = archetypes;
        self
    }

    pub fn archetypes(&self) -> &ArchetypeRegistry {
        &self.archetypes
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> flume::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    /// Register a lifecycle event sink.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        self.bus.register_sink(sink);
    }

    // -----------------------------------------------------------------------
    // Control API
    // -----------------------------------------------------------------------

    /// Spawn a new agent from a registered archetype at a known node.
    pub async fn create_agent(
        &self,
        archetype_name: &str,
        source_node: &str,
        target_node: Option<String>,
    ) -> Result<Agent> {
        let archetype = self
            .archetypes
            .require(archetype_name)
            .map_err(|_| OrchestratorError::UnknownArchetype(archetype_name.to_string()))?
            .clone();

        let origin_metrics = {
            let registry = self.registry.lock().await;
            registry
                .get(source_node)
                .map(|n| n.metrics)
                .ok_or_else(|| OrchestratorError::UnknownNode(source_node.to_string()))?
        };

        let payload = AgentPayload {
            origin_metrics,
            lineage: serde_json::json!({
                "archetype": archetype.name,
                "origin": source_node,
                "intent": archetype.intent,
            }),
        };

        let now = self.clock.now();
        let mut pool = self.pool.lock().await;
        pool.spawn(archetype_name, source_node, target_node, payload, now)
            .map_err(|e| match e {
                PoolError::AtCapacity(cap) => OrchestratorError::AtCapacity(cap),
            })
    }

    /// Read-only status snapshot. No side effects.
    pub async fn status(&self) -> OrchestratorStatus {
        let (active_count, completed_count, counters) = {
            let pool = self.pool.lock().await;
            (pool.active_count(), pool.completed_count(), pool.counters())
        };
        let (known_nodes, receptive_nodes) = {
            let registry = self.registry.lock().await;
            (registry.len(), registry.receptive_count())
        };
        OrchestratorStatus {
            active_count,
            completed_count,
            known_nodes,
            receptive_nodes,
            counters,
        }
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    /// Run one orchestration cycle.
    ///
    /// In order: refresh the registry (bounded by the configured timeout;
    /// failures degrade to the previous view), step every active agent in
    /// creation order (lifespan expiry first, then routing -> admission ->
    /// effect), retire closed agents, publish one lifecycle event per
    /// observed transition.
    pub async fn tick(&self) -> TickReport {
        let refreshed_nodes = self.refresh_registry().await;

        let nodes = {
            let registry = self.registry.lock().await;
            registry.sorted_nodes()
        };

        let now = self.clock.now();
        let mut events: Vec<LifecycleEvent> = Vec::new();
        let mut landings: Vec<(Agent, AgentArchetype)> = Vec::new();
        let mut tallies = Tallies::default();

        let (processed, closed) = {
            let mut pool = self.pool.lock().await;

            for agent in pool.active_mut() {
                let archetype = match self.archetypes.get(&agent.archetype) {
                    Some(a) => a.clone(),
                    None => {
                        error!(
                            agent_id = %agent.id,
                            archetype = %agent.archetype,
                            "archetype missing for active agent; force-expiring"
                        );
                        record_force_expiry(agent, now, &mut events, &mut tallies);
                        continue;
                    }
                };

                let router = self.router.as_ref();
                let step = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    step_agent(agent, &archetype, router, &nodes, now)
                }));

                match step {
                    Ok(Ok(outcome)) => {
                        if outcome.landed {
                            landings.push((agent.clone(), archetype));
                        }
                        for t in outcome.transitions {
                            tallies.record(t.event);
                            events.push(LifecycleEvent {
                                agent_id: agent.id,
                                archetype: agent.archetype.clone(),
                                from_state: t.from,
                                to_state: t.to,
                                node: t.node,
                                timestamp: now,
                            });
                        }
                    }
                    Ok(Err(e)) => {
                        error!(agent_id = %agent.id, error = %e, "agent processing failed; force-expiring");
                        record_force_expiry(agent, now, &mut events, &mut tallies);
                    }
                    Err(_) => {
                        error!(agent_id = %agent.id, "agent processing panicked; force-expiring");
                        record_force_expiry(agent, now, &mut events, &mut tallies);
                    }
                }
            }

            let processed = pool.active_count();
            tallies.add_to(pool.counters_mut());
            let closed = pool.retire_closed();
            (processed, closed)
        };

        if !landings.is_empty() {
            let mut registry = self.registry.lock().await;
            for (agent, archetype) in &landings {
                if let Err(e) = admission::apply_landing(&mut registry, agent, archetype, now) {
                    warn!(
                        agent_id = %agent.id,
                        node = %agent.current_node,
                        error = %e,
                        "failed to apply landing effect"
                    );
                }
            }
            registry.enforce_bounds();
        }

        let transitions = events.len();
        for event in events {
            self.bus.publish(event);
        }

        info!(
            refreshed = refreshed_nodes,
            processed,
            transitions,
            closed,
            landings = landings.len(),
            "cycle complete"
        );

        TickReport {
            refreshed_nodes,
            processed,
            transitions,
            closed,
        }
    }

    /// Fetch from the provider under the configured timeout and merge.
    ///
    /// A slow or failing provider degrades freshness, never progress: the
    /// previous registry view is retained and the cycle continues.
    async fn refresh_registry(&self) -> usize {
        let deadline = Duration::from_secs(self.config.refresh_timeout_secs);
        match tokio::time::timeout(deadline, self.provider.fetch_snapshot()).await {
            Ok(Ok(snapshots)) => {
                let mut registry = self.registry.lock().await;
                registry.merge_snapshots(snapshots)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "node provider failed; retaining previous registry view");
                0
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.refresh_timeout_secs,
                    "node provider timed out; retaining previous registry view"
                );
                0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-agent stepping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Transition {
    event: AgentEvent,
    from: AgentState,
    to: AgentState,
    node: Option<String>,
}

#[derive(Debug, Default)]
struct StepOutcome {
    transitions: Vec<Transition>,
    landed: bool,
}

impl StepOutcome {
    fn apply(
        &mut self,
        agent: &mut Agent,
        event: AgentEvent,
        node: Option<String>,
    ) -> std::result::Result<(), StateMachineError> {
        let from = agent.state;
        let to = state_machine::transition(from, event)?;
        agent.state = to;
        self.transitions.push(Transition {
            event,
            from,
            to,
            node,
        });
        Ok(())
    }
}

/// Advance one agent by one cycle against a registry snapshot.
///
/// Pure with respect to the registry: landing effects are reported via
/// `landed` and applied by the caller once the pool lock is released.
fn step_agent(
    agent: &mut Agent,
    archetype: &AgentArchetype,
    router: &dyn Router,
    nodes: &[Node],
    now: DateTime<Utc>,
) -> std::result::Result<StepOutcome, StateMachineError> {
    let mut out = StepOutcome::default();

    // One cycle in Expiring has passed; remove from the active set.
    if agent.state == AgentState::Expiring {
        out.apply(agent, AgentEvent::Close, Some(agent.current_node.clone()))?;
        return Ok(out);
    }

    // Lifespan expiry preempts routing and admission.
    if agent.age_secs(now) >= archetype.lifespan_secs {
        out.apply(agent, AgentEvent::Expire, Some(agent.current_node.clone()))?;
        return Ok(out);
    }

    // Between cycles an agent is either Traveling or Expiring.
    debug_assert_eq!(agent.state, AgentState::Traveling);

    match router.next_node(agent, archetype.routing, nodes) {
        // No valid hop this cycle: stay in place, lifespan budget still burns.
        None => {}
        Some(next) if next == agent.current_node => {}
        Some(next) => {
            agent.current_node = next.clone();
            agent.push_trail(next.clone());
            out.apply(agent, AgentEvent::Hop, Some(next.clone()))?;

            let admitted = nodes
                .iter()
                .find(|n| n.id == next)
                .map(|n| admission::can_admit(n, archetype))
                .unwrap_or(false);

            if admitted {
                out.apply(agent, AgentEvent::Admit, Some(next.clone()))?;
                out.landed = true;
                // An agent dissolves upon landing.
                out.apply(agent, AgentEvent::Expire, Some(next))?;
            } else {
                out.apply(agent, AgentEvent::Deny, Some(next))?;
            }
        }
    }

    Ok(out)
}

/// Isolate a faulted agent: force it onto the expiry path and record the
/// transition so observers see it dissolve.
fn record_force_expiry(
    agent: &mut Agent,
    now: DateTime<Utc>,
    events: &mut Vec<LifecycleEvent>,
    tallies: &mut Tallies,
) {
    if matches!(agent.state, AgentState::Expiring | AgentState::Closed) {
        return;
    }
    let from = agent.state;
    agent.state = AgentState::Expiring;
    tallies.record(AgentEvent::Expire);
    events.push(LifecycleEvent {
        agent_id: agent.id,
        archetype: agent.archetype.clone(),
        from_state: from,
        to_state: AgentState::Expiring,
        node: Some(agent.current_node.clone()),
        timestamp: now,
    });
}

/// Per-cycle counter deltas, merged into the pool's counters once the agent
/// sweep finishes.
#[derive(Debug, Default)]
struct Tallies {
    hopped: u64,
    admitted: u64,
    expired: u64,
    closed: u64,
}

impl Tallies {
    fn record(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Hop => self.hopped += 1,
            AgentEvent::Admit => self.admitted += 1,
            AgentEvent::Expire => self.expired += 1,
            AgentEvent::Close => self.closed += 1,
            AgentEvent::Deny => {}
        }
    }

    fn add_to(&self, counters: &mut drifter_core::types::CycleCounters) {
        counters.hopped += self.hopped;
        counters.admitted += self.admitted;
        counters.expired += self.expired;
        counters.closed += self.closed;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use drifter_core::types::{NodeMetrics, RoutingPolicy};
    use drifter_engine::routing::SeededRandom;

    fn node(id: &str, stability: f64, openness: f64) -> Node {
        let mut n = Node::new(id, "sensor", NodeMetrics::new(stability, openness, 0.5));
        n.recompute_receptive(0.2);
        n
    }

    fn archetype(stability: f64, openness: f64, lifespan: f64) -> AgentArchetype {
        AgentArchetype {
            name: "probe".to_string(),
            lifespan_secs: lifespan,
            routing: RoutingPolicy::Sequential,
            stability_threshold: stability,
            openness_threshold: openness,
            intent: "test".to_string(),
            effect: drifter_core::types::ArchetypeEffect {
                metric: drifter_core::types::MetricKind::Stability,
                delta: 0.1,
                cap: 0.9,
            },
        }
    }

    fn agent() -> Agent {
        let payload = AgentPayload {
            origin_metrics: NodeMetrics::default(),
            lineage: serde_json::json!({}),
        };
        Agent::new("probe", "n1", None, payload, Utc::now())
    }

    struct TestRouter;
    impl Router for TestRouter {
        fn next_node(
            &self,
            agent: &Agent,
            policy: RoutingPolicy,
            nodes: &[Node],
        ) -> Option<String> {
            let mut rng = SeededRandom::new(0);
            drifter_engine::routing::next_node(policy, agent, nodes, &mut rng)
        }
    }

    #[test]
    fn step_hops_and_lands_in_one_cycle() {
        let nodes = vec![node("n1", 0.9, 0.9), node("n2", 0.9, 0.9)];
        let mut a = agent();
        let arch = archetype(0.5, 0.5, 100.0);

        let out = step_agent(&mut a, &arch, &TestRouter, &nodes, Utc::now()).unwrap();
        assert!(out.landed);
        assert_eq!(a.state, AgentState::Expiring);
        assert_eq!(a.current_node, "n2");
        // Hop, Admit, Expire.
        assert_eq!(out.transitions.len(), 3);
    }

    #[test]
    fn step_denied_resumes_traveling() {
        let nodes = vec![node("n1", 0.9, 0.9), node("n2", 0.1, 0.1)];
        let mut a = agent();
        let arch = archetype(0.8, 0.8, 100.0);

        let out = step_agent(&mut a, &arch, &TestRouter, &nodes, Utc::now()).unwrap();
        assert!(!out.landed);
        assert_eq!(a.state, AgentState::Traveling);
        assert_eq!(a.current_node, "n2");
        // Hop, Deny.
        assert_eq!(out.transitions.len(), 2);
    }

    #[test]
    fn step_stays_with_single_node() {
        let nodes = vec![node("n1", 0.9, 0.9)];
        let mut a = agent();
        let arch = archetype(0.5, 0.5, 100.0);

        let out = step_agent(&mut a, &arch, &TestRouter, &nodes, Utc::now()).unwrap();
        assert!(out.transitions.is_empty());
        assert_eq!(a.state, AgentState::Traveling);
        assert_eq!(a.current_node, "n1");
    }

    #[test]
    fn step_expires_before_routing() {
        let nodes = vec![node("n1", 0.9, 0.9), node("n2", 0.9, 0.9)];
        let mut a = agent();
        let arch = archetype(0.0, 0.0, 5.0);
        let later = a.created_at + chrono::Duration::seconds(10);

        let out = step_agent(&mut a, &arch, &TestRouter, &nodes, later).unwrap();
        assert_eq!(a.state, AgentState::Expiring);
        assert_eq!(out.transitions.len(), 1);
        assert_eq!(out.transitions[0].event, AgentEvent::Expire);
    }

    #[test]
    fn step_closes_expiring_agent() {
        let mut a = agent();
        a.state = AgentState::Expiring;
        let arch = archetype(0.0, 0.0, 100.0);

        let out = step_agent(&mut a, &arch, &TestRouter, &[], Utc::now()).unwrap();
        assert_eq!(a.state, AgentState::Closed);
        assert_eq!(out.transitions.len(), 1);
        assert_eq!(out.transitions[0].event, AgentEvent::Close);
    }

    #[test]
    fn force_expiry_skips_terminal_states() {
        let mut events = Vec::new();
        let mut tallies = Tallies::default();

        let mut a = agent();
        a.state = AgentState::Closed;
        record_force_expiry(&mut a, Utc::now(), &mut events, &mut tallies);
        assert_eq!(a.state, AgentState::Closed);
        assert!(events.is_empty());

        let mut b = agent();
        record_force_expiry(&mut b, Utc::now(), &mut events, &mut tallies);
        assert_eq!(b.state, AgentState::Expiring);
        assert_eq!(events.len(), 1);
        assert_eq!(tallies.expired, 1);
    }
}
