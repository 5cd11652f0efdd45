use std::collections::HashMap;

use chrono::{DateTime, Utc};
use drifter_core::types::{MetricKind, Node, NodeMetrics, NodeSnapshot};
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown node: `{0}`")]
    UnknownNode(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Error surfaced by a `NodeStatusProvider` implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

// ---------------------------------------------------------------------------
// NodeStatusProvider
// ---------------------------------------------------------------------------

/// External source of node metrics.
///
/// The registry never assumes a particular transport; polling, push-backed,
/// and static-fixture implementations are all valid. The caller bounds each
/// fetch with a timeout and keeps the previous registry view on failure.
#[async_trait::async_trait]
pub trait NodeStatusProvider: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, ProviderError>;
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// The current best-known view of all nodes, keyed by id.
///
/// The registry is the sole owner of node mutation: effects and admissions
/// go through [`apply_effect`] / [`record_admission`], and metric clamping
/// plus the derived `receptive` flag are maintained here.
///
/// [`apply_effect`]: NodeRegistry::apply_effect
/// [`record_admission`]: NodeRegistry::record_admission
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
    receptive_floor: f64,
}

impl NodeRegistry {
    pub fn new(receptive_floor: f64) -> Self {
        Self {
            nodes: HashMap::new(),
            receptive_floor,
        }
    }

    /// Pull a snapshot from the provider and merge it in. Returns the number
    /// of snapshot entries merged.
    ///
    /// Idempotent and safe to call every cycle: a partial or empty snapshot
    /// upserts what it contains and leaves stale nodes in place. A provider
    /// error leaves the registry untouched; the caller logs and continues
    /// with the previous view.
    pub async fn refresh(
        &mut self,
        provider: &dyn NodeStatusProvider,
    ) -> Result<usize, RegistryError> {
        let snapshots = provider.fetch_snapshot().await?;
        Ok(self.merge_snapshots(snapshots))
    }

    /// Upsert snapshot entries by id and recompute receptivity.
    pub fn merge_snapshots(&mut self, snapshots: Vec<NodeSnapshot>) -> usize {
        let merged = snapshots.len();
        for snap in snapshots {
            let metrics = NodeMetrics::new(snap.stability, snap.openness, snap.alignment);
            match self.nodes.get_mut(&snap.id) {
                Some(node) => {
                    node.kind = snap.kind;
                    node.metrics = metrics;
                }
                None => {
                    debug!(node_id = %snap.id, kind = %snap.kind, "discovered node");
                    self.nodes
                        .insert(snap.id.clone(), Node::new(snap.id, snap.kind, metrics));
                }
            }
        }
        for node in self.nodes.values_mut() {
            node.recompute_receptive(self.receptive_floor);
        }
        merged
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn receptive_count(&self) -> usize {
        self.nodes.values().filter(|n| n.receptive).count()
    }

    /// All nodes ordered lexicographically by id. Routing operates on this
    /// stable ordering so policies stay deterministic for a given view.
    pub fn sorted_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Apply a landing effect: `metric += delta`, clamped to `[0, cap]` and
    /// then to `[0,1]`. Recomputes receptivity.
    ///
    /// A degenerate cap or delta (NaN, cap outside [0,1]) is sanitized
    /// rather than allowed to panic the loop.
    pub fn apply_effect(
        &mut self,
        id: &str,
        metric: MetricKind,
        delta: f64,
        cap: f64,
    ) -> Result<(), RegistryError> {
        let floor = self.receptive_floor;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownNode(id.to_string()))?;

        let cap = if cap.is_nan() { 1.0 } else { cap.clamp(0.0, 1.0) };
        let delta = if delta.is_nan() { 0.0 } else { delta };
        let before = node.metrics.get(metric);
        let after = (before + delta).clamp(0.0, cap);
        node.metrics.set(metric, after);
        node.recompute_receptive(floor);

        debug!(
            node_id = %id,
            metric = %metric,
            before,
            after,
            cap,
            "applied landing effect"
        );
        Ok(())
    }

    /// Record a successful admission on the node.
    pub fn record_admission(
        &mut self,
        id: &str,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownNode(id.to_string()))?;
        node.record_admission(agent_id, at);
        Ok(())
    }

    /// Check invariants in debug builds; clamp and log in release.
    ///
    /// Metric boundedness is maintained by `NodeMetrics`, so a violation
    /// here is a programmer error. Production clamps rather than crashing
    /// the loop.
    pub fn enforce_bounds(&mut self) {
        for node in self.nodes.values_mut() {
            let m = node.metrics;
            let in_bounds = |v: f64| (0.0..=1.0).contains(&v);
            if !(in_bounds(m.stability) && in_bounds(m.openness) && in_bounds(m.alignment)) {
                debug_assert!(false, "node {} metrics out of bounds: {:?}", node.id, m);
                warn!(node_id = %node.id, metrics = ?m, "metrics out of bounds, clamping");
                node.metrics.clamp();
                node.recompute_receptive(self.receptive_floor);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
