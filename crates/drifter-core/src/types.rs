use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of node ids kept in an agent's trail.
pub const TRAIL_CAP: usize = 50;

/// Maximum number of agent ids kept in a node's admission history.
pub const ADMISSION_HISTORY_CAP: usize = 20;

// ---------------------------------------------------------------------------
// MetricKind
// ---------------------------------------------------------------------------

/// The three health/receptivity axes every node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Stability,
    Openness,
    Alignment,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MetricKind::Stability => "stability",
            MetricKind::Openness => "openness",
            MetricKind::Alignment => "alignment",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// NodeMetrics
// ---------------------------------------------------------------------------

/// Bounded node health metrics. Every mutation must go through [`set`] or
/// [`clamp`] so the [0,1] invariant holds at all times.
///
/// [`set`]: NodeMetrics::set
/// [`clamp`]: NodeMetrics::clamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub stability: f64,
    pub openness: f64,
    pub alignment: f64,
}

impl NodeMetrics {
    pub fn new(stability: f64, openness: f64, alignment: f64) -> Self {
        let mut m = Self {
            stability,
            openness,
            alignment,
        };
        m.clamp();
        m
    }

    /// Read a single metric.
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Stability => self.stability,
            MetricKind::Openness => self.openness,
            MetricKind::Alignment => self.alignment,
        }
    }

    /// Write a single metric, clamping the stored value to [0,1].
    pub fn set(&mut self, kind: MetricKind, value: f64) {
        let v = value.clamp(0.0, 1.0);
        match kind {
            MetricKind::Stability => self.stability = v,
            MetricKind::Openness => self.openness = v,
            MetricKind::Alignment => self.alignment = v,
        }
    }

    /// Force all three metrics back into [0,1]. NaN collapses to 0.
    pub fn clamp(&mut self) {
        for kind in [
            MetricKind::Stability,
            MetricKind::Openness,
            MetricKind::Alignment,
        ] {
            let v = self.get(kind);
            let v = if v.is_nan() { 0.0 } else { v };
            self.set(kind, v);
        }
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            stability: 0.0,
            openness: 0.0,
            alignment: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A registry entry representing a destination agents can drift to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Free-form classification tag (e.g. device category).
    pub kind: String,
    pub metrics: NodeMetrics,
    /// Derived: whether the node is currently receptive to arrivals.
    /// Recomputed by the registry whenever metrics change.
    pub receptive: bool,
    pub last_admitted_at: Option<DateTime<Utc>>,
    /// Agent ids previously admitted, most-recent-first, bounded.
    pub admission_history: VecDeque<Uuid>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, metrics: NodeMetrics) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            metrics,
            receptive: false,
            last_admitted_at: None,
            admission_history: VecDeque::new(),
        }
    }

    /// Recompute the derived `receptive` flag against the given floor.
    pub fn recompute_receptive(&mut self, floor: f64) {
        self.receptive = self.metrics.stability > floor && self.metrics.openness > floor;
    }

    /// Record a successful landing: agent id front of history (bounded),
    /// timestamp updated.
    pub fn record_admission(&mut self, agent_id: Uuid, at: DateTime<Utc>) {
        self.admission_history.push_front(agent_id);
        self.admission_history.truncate(ADMISSION_HISTORY_CAP);
        self.last_admitted_at = Some(at);
    }
}

/// Wire type delivered by a `NodeStatusProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub kind: String,
    pub stability: f64,
    pub openness: f64,
    pub alignment: f64,
}

// ---------------------------------------------------------------------------
// RoutingPolicy
// ---------------------------------------------------------------------------

/// The pluggable strategy determining an agent's next node each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    Sequential,
    Alternating,
    Gradient,
    RandomWalk,
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RoutingPolicy::Sequential => "sequential",
            RoutingPolicy::Alternating => "alternating",
            RoutingPolicy::Gradient => "gradient",
            RoutingPolicy::RandomWalk => "random_walk",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

/// The metric boost an archetype applies to a node on landing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeEffect {
    pub metric: MetricKind,
    pub delta: f64,
    /// The effect never pushes the metric above this value.
    pub cap: f64,
}

/// Immutable template defining an agent's lifespan, routing policy,
/// admission thresholds, and landing effect. Looked up by name in the
/// archetype registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentArchetype {
    pub name: String,
    /// Seconds from creation until forced expiry. Must be > 0.
    pub lifespan_secs: f64,
    pub routing: RoutingPolicy,
    /// Admission minimums, each in [0,1].
    pub stability_threshold: f64,
    pub openness_threshold: f64,
    /// Free-text description of what this archetype is for.
    pub intent: String,
    pub effect: ArchetypeEffect,
}

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

/// Lifecycle state of a drifting agent. Initial `Traveling`, terminal
/// `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Traveling,
    Arriving,
    Admitted,
    Expiring,
    Closed,
}

impl AgentState {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &AgentState) -> bool {
        matches!(
            (self, target),
            (AgentState::Traveling, AgentState::Arriving)
                | (AgentState::Arriving, AgentState::Admitted)
                | (AgentState::Arriving, AgentState::Traveling)
                | (AgentState::Admitted, AgentState::Expiring)
                | (AgentState::Traveling, AgentState::Expiring)
                | (AgentState::Arriving, AgentState::Expiring)
                | (AgentState::Expiring, AgentState::Closed)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Closed)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AgentState::Traveling => "Traveling",
            AgentState::Arriving => "Arriving",
            AgentState::Admitted => "Admitted",
            AgentState::Expiring => "Expiring",
            AgentState::Closed => "Closed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Snapshot captured at agent creation time. Immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPayload {
    /// Metrics of the origin node at spawn time.
    pub origin_metrics: NodeMetrics,
    /// Free-form lineage map.
    pub lineage: serde_json::Value,
}

/// An ephemeral entity that moves between nodes, carries a payload, and is
/// retired after a bounded lifespan. Mutated exclusively by the agent pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Name of the archetype this agent was spawned from.
    pub archetype: String,
    pub source_node: String,
    /// `None` means open-ended drift.
    pub target_node: Option<String>,
    pub current_node: String,
    pub state: AgentState,
    pub created_at: DateTime<Utc>,
    pub payload: AgentPayload,
    /// Visited node ids, append-only, oldest dropped beyond [`TRAIL_CAP`].
    pub trail: VecDeque<String>,
}

impl Agent {
    pub fn new(
        archetype: impl Into<String>,
        source_node: impl Into<String>,
        target_node: Option<String>,
        payload: AgentPayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        let source = source_node.into();
        Self {
            id: Uuid::new_v4(),
            archetype: archetype.into(),
            source_node: source.clone(),
            target_node,
            current_node: source,
            state: AgentState::Traveling,
            created_at,
            payload,
            trail: VecDeque::new(),
        }
    }

    /// Append a visited node to the trail, dropping the oldest entry past
    /// the cap.
    pub fn push_trail(&mut self, node_id: impl Into<String>) {
        self.trail.push_back(node_id.into());
        while self.trail.len() > TRAIL_CAP {
            self.trail.pop_front();
        }
    }

    /// Seconds this agent has been alive at `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let micros = now.signed_duration_since(self.created_at).num_microseconds();
        match micros {
            Some(us) => us as f64 / 1_000_000.0,
            None => f64::MAX, // overflow means "ancient"
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle events & counters
// ---------------------------------------------------------------------------

/// Emitted once per observed state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub agent_id: Uuid,
    pub archetype: String,
    pub from_state: AgentState,
    pub to_state: AgentState,
    /// The node involved in the transition, when one is.
    pub node: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-category counters accumulated across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounters {
    pub created: u64,
    pub hopped: u64,
    pub admitted: u64,
    pub expired: u64,
    pub closed: u64,
}

/// Read-only status snapshot returned by the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub active_count: usize,
    pub completed_count: usize,
    pub known_nodes: usize,
    pub receptive_nodes: usize,
    pub counters: CycleCounters,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
