use chrono::{DateTime, Utc};
use drifter_core::types::{Agent, AgentArchetype, Node};
use tracing::debug;

use crate::registry::{NodeRegistry, RegistryError};

// ---------------------------------------------------------------------------
// Admission evaluator
// ---------------------------------------------------------------------------

/// Whether `node` accepts an arriving agent of `archetype`.
///
/// Pure and total: both metrics must meet the archetype's minimums.
pub fn can_admit(node: &Node, archetype: &AgentArchetype) -> bool {
    node.metrics.stability >= archetype.stability_threshold
        && node.metrics.openness >= archetype.openness_threshold
}

// ---------------------------------------------------------------------------
// Effect applicator
// ---------------------------------------------------------------------------

/// Apply the archetype's landing effect to the admitting node and record the
/// admission.
///
/// Not idempotent: each call compounds the effect. The state machine allows
/// at most one `Arriving -> Admitted` transition per agent, which bounds
/// this to at-most-once per landing.
pub fn apply_landing(
    registry: &mut NodeRegistry,
    agent: &Agent,
    archetype: &AgentArchetype,
    at: DateTime<Utc>,
) -> Result<(), RegistryError> {
    let effect = archetype.effect;
    registry.apply_effect(&agent.current_node, effect.metric, effect.delta, effect.cap)?;
    registry.record_admission(&agent.current_node, agent.id, at)?;
    debug!(
        agent_id = %agent.id,
        archetype = %archetype.name,
        node = %agent.current_node,
        metric = %effect.metric,
        delta = effect.delta,
        "landing effect applied"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
