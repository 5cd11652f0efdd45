//! Domain engine for the drifter orchestrator.
//!
//! Pure-ish building blocks the daemon loop composes each cycle: the agent
//! state machine, the archetype registry, the node registry fed by a
//! `NodeStatusProvider`, the routing policy engine, the admission/effect
//! logic, and the agent pool that owns active and completed agents.

pub mod admission;
pub mod archetype;
pub mod pool;
pub mod registry;
pub mod routing;
pub mod state_machine;
