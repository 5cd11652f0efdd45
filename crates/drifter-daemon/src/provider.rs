use drifter_core::config::NodeSeed;
use drifter_core::types::NodeSnapshot;
use drifter_engine::registry::{NodeStatusProvider, ProviderError};

// ---------------------------------------------------------------------------
// FixtureProvider
// ---------------------------------------------------------------------------

/// A `NodeStatusProvider` backed by static snapshots.
///
/// Used by the binary to serve `[[nodes]]` entries from the config file, and
/// by tests as a deterministic registry source. The orchestrator core never
/// embeds node data; this is the collaborator that supplies it.
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    snapshots: Vec<NodeSnapshot>,
}

impl FixtureProvider {
    pub fn new(snapshots: Vec<NodeSnapshot>) -> Self {
        Self { snapshots }
    }

    pub fn from_seeds(seeds: &[NodeSeed]) -> Self {
        let snapshots = seeds
            .iter()
            .map(|seed| NodeSnapshot {
                id: seed.id.clone(),
                kind: seed.kind.clone(),
                stability: seed.stability,
                openness: seed.openness,
                alignment: seed.alignment,
            })
            .collect();
        Self { snapshots }
    }
}

#[async_trait::async_trait]
impl NodeStatusProvider for FixtureProvider {
    async fn fetch_snapshot(&self) -> Result<Vec<NodeSnapshot>, ProviderError> {
        Ok(self.snapshots.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
