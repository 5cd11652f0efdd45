//! Background daemon for the drifter agent system.
//!
//! The daemon drives the drift-and-landing cycle: each interval it refreshes
//! the node registry from the configured provider, advances every active
//! agent (routing, admission, landing effects), expires and retires agents,
//! and emits lifecycle events. The orchestrator is also usable single-shot
//! via [`orchestrator::Orchestrator::tick`] for deterministic testing.

pub mod daemon;
pub mod events;
pub mod orchestrator;
pub mod provider;
pub mod shutdown;
