use std::sync::Mutex;

use drifter_core::types::{Agent, Node, RoutingPolicy};
use uuid::Uuid;

/// Stability above this puts a node in the "high" partition for the
/// alternating policy.
const ALTERNATING_SPLIT: f64 = 0.5;

// ---------------------------------------------------------------------------
// RandomSource
// ---------------------------------------------------------------------------

/// Injectable randomness for the random-walk policy.
///
/// Tests use [`SeededRandom::new`] with a fixed seed; production seeds from
/// entropy. Keeping this behind a trait keeps `next_node` a deterministic
/// function of its inputs.
pub trait RandomSource: Send {
    /// A uniformly distributed index in `0..bound`. Returns 0 for an empty
    /// bound.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// splitmix64 generator; tiny, seedable, and good enough for picking a
/// neighbour.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Seed from process entropy (a v4 uuid, which is already in the stack).
    pub fn from_entropy() -> Self {
        Self::new(Uuid::new_v4().as_u128() as u64)
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl RandomSource for SeededRandom {
    fn next_index(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u64() % bound as u64) as usize
    }
}

// ---------------------------------------------------------------------------
// Policy engine
// ---------------------------------------------------------------------------

/// Choose the agent's next node under `policy`.
///
/// `nodes` must be sorted lexicographically by id (the registry's
/// [`sorted_nodes`] view); every policy's determinism relies on that stable
/// ordering. Returns `None` when fewer than 2 nodes are known -- the caller
/// treats this as "stay in place this cycle", not an error.
///
/// [`sorted_nodes`]: crate::registry::NodeRegistry::sorted_nodes
pub fn next_node(
    policy: RoutingPolicy,
    agent: &Agent,
    nodes: &[Node],
    rng: &mut dyn RandomSource,
) -> Option<String> {
    if nodes.len() < 2 {
        return None;
    }
    match policy {
        RoutingPolicy::Sequential => sequential(agent, nodes),
        RoutingPolicy::Alternating => alternating(agent, nodes),
        RoutingPolicy::Gradient => gradient(agent, nodes),
        RoutingPolicy::RandomWalk => random_walk(agent, nodes, rng),
    }
}

/// Ring over the sorted ids, starting after the agent's current node.
fn sequential(agent: &Agent, nodes: &[Node]) -> Option<String> {
    match nodes.iter().position(|n| n.id == agent.current_node) {
        Some(pos) => Some(nodes[(pos + 1) % nodes.len()].id.clone()),
        // Current node unknown to the registry: enter the ring at its start.
        None => Some(nodes[0].id.clone()),
    }
}

/// Partition by stability, alternate the target set on trail parity.
fn alternating(agent: &Agent, nodes: &[Node]) -> Option<String> {
    let want_high = agent.trail.len() % 2 == 0;
    let pick = nodes
        .iter()
        .filter(|n| (n.metrics.stability > ALTERNATING_SPLIT) == want_high)
        .find(|n| n.id != agent.current_node);
    match pick {
        Some(n) => Some(n.id.clone()),
        None => sequential(agent, nodes),
    }
}

/// Highest alignment, excluding the current node; ties break to the lowest
/// id (first in the sorted slice wins under strict comparison).
fn gradient(agent: &Agent, nodes: &[Node]) -> Option<String> {
    let mut best: Option<&Node> = None;
    for node in nodes.iter().filter(|n| n.id != agent.current_node) {
        best = match best {
            Some(b) if node.metrics.alignment <= b.metrics.alignment => Some(b),
            _ => Some(node),
        };
    }
    best.map(|n| n.id.clone())
}

/// Uniform pick among known nodes, excluding the current one.
fn random_walk(agent: &Agent, nodes: &[Node], rng: &mut dyn RandomSource) -> Option<String> {
    let candidates: Vec<&Node> = nodes.iter().filter(|n| n.id != agent.current_node).collect();
    if candidates.is_empty() {
        return None;
    }
    let idx = rng.next_index(candidates.len());
    Some(candidates[idx].id.clone())
}

// ---------------------------------------------------------------------------
// Router — injection seam for the orchestrator
// ---------------------------------------------------------------------------

/// Routing seam the orchestrator calls through, so tests can substitute
/// scripted or faulting implementations.
pub trait Router: Send + Sync {
    fn next_node(&self, agent: &Agent, policy: RoutingPolicy, nodes: &[Node]) -> Option<String>;
}

/// Production router: the pure policy engine plus an owned random source.
pub struct PolicyRouter {
    rng: Mutex<SeededRandom>,
}

impl PolicyRouter {
    /// Entropy-seeded router for production use.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SeededRandom::from_entropy()),
        }
    }

    /// Deterministic router for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SeededRandom::new(seed)),
        }
    }
}

impl Default for PolicyRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Router for PolicyRouter {
    fn next_node(&self, agent: &Agent, policy: RoutingPolicy, nodes: &[Node]) -> Option<String> {
        let mut rng = self.rng.lock().expect("PolicyRouter rng lock poisoned");
        next_node(policy, agent, nodes, &mut *rng)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drifter_core::types::{AgentPayload, NodeMetrics};

    fn node(id: &str, stability: f64, alignment: f64) -> Node {
        Node::new(id, "sensor", NodeMetrics::new(stability, 0.5, alignment))
    }

    fn agent_at(current: &str) -> Agent {
        let payload = AgentPayload {
            origin_metrics: NodeMetrics::default(),
            lineage: serde_json::json!({}),
        };
        let mut agent = Agent::new("scout", current, None, payload, Utc::now());
        agent.current_node = current.to_string();
        agent
    }

    fn rng() -> SeededRandom {
        SeededRandom::new(42)
    }

    #[test]
    fn fewer_than_two_nodes_means_stay() {
        let nodes = vec![node("n1", 0.5, 0.5)];
        let agent = agent_at("n1");
        for policy in [
            RoutingPolicy::Sequential,
            RoutingPolicy::Alternating,
            RoutingPolicy::Gradient,
            RoutingPolicy::RandomWalk,
        ] {
            assert_eq!(next_node(policy, &agent, &nodes, &mut rng()), None);
        }
    }

    #[test]
    fn sequential_advances_and_wraps() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5), node("n3", 0.5, 0.5)];

        let agent = agent_at("n1");
        assert_eq!(
            next_node(RoutingPolicy::Sequential, &agent, &nodes, &mut rng()),
            Some("n2".to_string())
        );

        let agent = agent_at("n3");
        assert_eq!(
            next_node(RoutingPolicy::Sequential, &agent, &nodes, &mut rng()),
            Some("n1".to_string())
        );
    }

    #[test]
    fn sequential_unknown_current_enters_ring() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5)];
        let agent = agent_at("gone");
        assert_eq!(
            next_node(RoutingPolicy::Sequential, &agent, &nodes, &mut rng()),
            Some("n1".to_string())
        );
    }

    #[test]
    fn sequential_is_deterministic() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5), node("n3", 0.5, 0.5)];
        let agent = agent_at("n2");
        let first = next_node(RoutingPolicy::Sequential, &agent, &nodes, &mut rng());
        for _ in 0..10 {
            assert_eq!(
                next_node(RoutingPolicy::Sequential, &agent, &nodes, &mut rng()),
                first
            );
        }
    }

    #[test]
    fn alternating_flips_partition_with_trail_parity() {
        let nodes = vec![
            node("calm-a", 0.9, 0.5),
            node("calm-b", 0.8, 0.5),
            node("rough-a", 0.2, 0.5),
        ];

        // Even trail: high-stability set, first id not current.
        let agent = agent_at("rough-a");
        assert_eq!(
            next_node(RoutingPolicy::Alternating, &agent, &nodes, &mut rng()),
            Some("calm-a".to_string())
        );

        // Odd trail: low-stability set.
        let mut agent = agent_at("calm-a");
        agent.push_trail("rough-a");
        assert_eq!(
            next_node(RoutingPolicy::Alternating, &agent, &nodes, &mut rng()),
            Some("rough-a".to_string())
        );
    }

    #[test]
    fn alternating_empty_set_falls_back_to_sequential() {
        // No node above the split: the "high" pick is empty on even parity.
        let nodes = vec![node("n1", 0.1, 0.5), node("n2", 0.2, 0.5)];
        let agent = agent_at("n1");
        assert_eq!(
            next_node(RoutingPolicy::Alternating, &agent, &nodes, &mut rng()),
            Some("n2".to_string())
        );
    }

    #[test]
    fn gradient_picks_highest_alignment_excluding_current() {
        let nodes = vec![node("n1", 0.5, 0.9), node("n2", 0.5, 0.4), node("n3", 0.5, 0.7)];
        let agent = agent_at("n1");
        // n1 has the top alignment but is the current node.
        assert_eq!(
            next_node(RoutingPolicy::Gradient, &agent, &nodes, &mut rng()),
            Some("n3".to_string())
        );
    }

    #[test]
    fn gradient_ties_break_to_lowest_id() {
        let nodes = vec![node("a", 0.5, 0.7), node("b", 0.5, 0.7), node("c", 0.5, 0.1)];
        let agent = agent_at("c");
        assert_eq!(
            next_node(RoutingPolicy::Gradient, &agent, &nodes, &mut rng()),
            Some("a".to_string())
        );
    }

    #[test]
    fn gradient_is_deterministic() {
        let nodes = vec![node("n1", 0.5, 0.3), node("n2", 0.5, 0.8), node("n3", 0.5, 0.8)];
        let agent = agent_at("n1");
        let first = next_node(RoutingPolicy::Gradient, &agent, &nodes, &mut rng());
        for _ in 0..10 {
            assert_eq!(
                next_node(RoutingPolicy::Gradient, &agent, &nodes, &mut rng()),
                first
            );
        }
    }

    #[test]
    fn random_walk_never_picks_current_and_is_seed_stable() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5), node("n3", 0.5, 0.5)];
        let agent = agent_at("n2");

        let mut a = SeededRandom::new(7);
        let mut b = SeededRandom::new(7);
        for _ in 0..50 {
            let pick_a = next_node(RoutingPolicy::RandomWalk, &agent, &nodes, &mut a).unwrap();
            let pick_b = next_node(RoutingPolicy::RandomWalk, &agent, &nodes, &mut b).unwrap();
            assert_ne!(pick_a, "n2");
            assert_eq!(pick_a, pick_b);
        }
    }

    #[test]
    fn random_walk_reaches_every_candidate() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5), node("n3", 0.5, 0.5)];
        let agent = agent_at("n1");
        let mut seen = std::collections::HashSet::new();
        let mut r = SeededRandom::new(3);
        for _ in 0..100 {
            seen.insert(next_node(RoutingPolicy::RandomWalk, &agent, &nodes, &mut r).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn policy_router_delegates() {
        let nodes = vec![node("n1", 0.5, 0.5), node("n2", 0.5, 0.5)];
        let agent = agent_at("n1");
        let router = PolicyRouter::with_seed(1);
        assert_eq!(
            router.next_node(&agent, RoutingPolicy::Sequential, &nodes),
            Some("n2".to_string())
        );
    }
}
