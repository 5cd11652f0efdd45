use std::collections::HashMap;

use drifter_core::types::{AgentArchetype, ArchetypeEffect, MetricKind, RoutingPolicy};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArchetypeError {
    #[error("archetype not found: `{0}`")]
    NotFound(String),
    #[error("duplicate archetype name: `{0}`")]
    Duplicate(String),
    #[error("archetype `{0}` has non-positive lifespan")]
    InvalidLifespan(String),
}

// ---------------------------------------------------------------------------
// ArchetypeRegistry
// ---------------------------------------------------------------------------

/// Registry of immutable agent templates, looked up by name.
///
/// Populated at startup (builtins plus any caller registrations); archetypes
/// are never mutated after registration, so lookups hand out references.
#[derive(Debug)]
pub struct ArchetypeRegistry {
    archetypes: HashMap<String, AgentArchetype>,
}

impl ArchetypeRegistry {
    pub fn new() -> Self {
        Self {
            archetypes: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in archetypes. Together they
    /// exercise every routing policy.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for archetype in builtin_archetypes() {
            // Builtins are statically valid; a failure here is a programmer
            // error caught by the unit tests below.
            let name = archetype.name.clone();
            if reg.register(archetype).is_err() {
                tracing::error!(name = %name, "builtin archetype rejected");
            }
        }
        reg
    }

    /// Register an archetype. Returns an error on duplicate names or a
    /// non-positive lifespan.
    pub fn register(&mut self, archetype: AgentArchetype) -> Result<(), ArchetypeError> {
        if archetype.lifespan_secs <= 0.0 {
            return Err(ArchetypeError::InvalidLifespan(archetype.name));
        }
        if self.archetypes.contains_key(&archetype.name) {
            return Err(ArchetypeError::Duplicate(archetype.name));
        }
        debug!(name = %archetype.name, policy = %archetype.routing, "registered archetype");
        self.archetypes.insert(archetype.name.clone(), archetype);
        Ok(())
    }

    /// Get an archetype by name.
    pub fn get(&self, name: &str) -> Option<&AgentArchetype> {
        self.archetypes.get(name)
    }

    /// Lookup that surfaces the not-found error for the control API.
    pub fn require(&self, name: &str) -> Result<&AgentArchetype, ArchetypeError> {
        self.archetypes
            .get(name)
            .ok_or_else(|| ArchetypeError::NotFound(name.to_string()))
    }

    /// List registered archetype names.
    pub fn names(&self) -> Vec<&str> {
        self.archetypes.keys().map(|s| s.as_str()).collect()
    }

    pub fn count(&self) -> usize {
        self.archetypes.len()
    }
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn builtin_archetypes() -> Vec<AgentArchetype> {
    vec![
        AgentArchetype {
            name: "scout".to_string(),
            lifespan_secs: 20.0,
            routing: RoutingPolicy::Gradient,
            stability_threshold: 0.2,
            openness_threshold: 0.2,
            intent: "Seek out the best-aligned nodes and nudge them open".to_string(),
            effect: ArchetypeEffect {
                metric: MetricKind::Openness,
                delta: 0.1,
                cap: 0.9,
            },
        },
        AgentArchetype {
            name: "settler".to_string(),
            lifespan_secs: 120.0,
            routing: RoutingPolicy::Sequential,
            stability_threshold: 0.6,
            openness_threshold: 0.5,
            intent: "Patrol the ring and reinforce already-solid nodes".to_string(),
            effect: ArchetypeEffect {
                metric: MetricKind::Stability,
                delta: 0.2,
                cap: 0.8,
            },
        },
        AgentArchetype {
            name: "beacon".to_string(),
            lifespan_secs: 60.0,
            routing: RoutingPolicy::Alternating,
            stability_threshold: 0.4,
            openness_threshold: 0.4,
            intent: "Bounce between calm and turbulent nodes, pulling them into line".to_string(),
            effect: ArchetypeEffect {
                metric: MetricKind::Alignment,
                delta: 0.15,
                cap: 0.85,
            },
        },
        AgentArchetype {
            name: "wanderer".to_string(),
            lifespan_secs: 45.0,
            routing: RoutingPolicy::RandomWalk,
            stability_threshold: 0.1,
            openness_threshold: 0.1,
            intent: "Drift at random and leave a faint trace of openness".to_string(),
            effect: ArchetypeEffect {
                metric: MetricKind::Openness,
                delta: 0.05,
                cap: 1.0,
            },
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_archetype(name: &str) -> AgentArchetype {
        AgentArchetype {
            name: name.to_string(),
            lifespan_secs: 10.0,
            routing: RoutingPolicy::Sequential,
            stability_threshold: 0.5,
            openness_threshold: 0.5,
            intent: format!("Test archetype {}", name),
            effect: ArchetypeEffect {
                metric: MetricKind::Stability,
                delta: 0.1,
                cap: 0.9,
            },
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ArchetypeRegistry::new();
        reg.register(make_archetype("probe")).unwrap();
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.get("probe").unwrap().name, "probe");
    }

    #[test]
    fn duplicate_rejected() {
        let mut reg = ArchetypeRegistry::new();
        reg.register(make_archetype("probe")).unwrap();
        let err = reg.register(make_archetype("probe")).unwrap_err();
        assert!(matches!(err, ArchetypeError::Duplicate(_)));
    }

    #[test]
    fn non_positive_lifespan_rejected() {
        let mut reg = ArchetypeRegistry::new();
        let mut bad = make_archetype("ghost");
        bad.lifespan_secs = 0.0;
        let err = reg.register(bad).unwrap_err();
        assert!(matches!(err, ArchetypeError::InvalidLifespan(_)));
    }

    #[test]
    fn require_missing_surfaces_not_found() {
        let reg = ArchetypeRegistry::new();
        let err = reg.require("nope").unwrap_err();
        assert!(matches!(err, ArchetypeError::NotFound(_)));
    }

    #[test]
    fn builtins_cover_every_policy() {
        let reg = ArchetypeRegistry::with_builtins();
        assert_eq!(reg.count(), 4);
        let policies: Vec<RoutingPolicy> = reg
            .names()
            .iter()
            .map(|n| reg.get(n).unwrap().routing)
            .collect();
        for policy in [
            RoutingPolicy::Sequential,
            RoutingPolicy::Alternating,
            RoutingPolicy::Gradient,
            RoutingPolicy::RandomWalk,
        ] {
            assert!(policies.contains(&policy), "missing policy {policy}");
        }
    }

    #[test]
    fn builtin_lifespans_positive() {
        let reg = ArchetypeRegistry::with_builtins();
        for name in reg.names() {
            assert!(reg.get(name).unwrap().lifespan_secs > 0.0);
        }
    }
}
