//! Core data model and shared infrastructure for the drifter workspace.
//!
//! Everything the engine and daemon crates agree on lives here: the node and
//! agent data model, the archetype template types, configuration loading, and
//! the injectable clock used to keep the orchestrator deterministic in tests.

pub mod clock;
pub mod config;
pub mod types;
