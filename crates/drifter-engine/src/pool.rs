use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use drifter_core::types::{Agent, AgentPayload, AgentState, CycleCounters};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("active agent capacity reached ({0})")]
    AtCapacity(usize),
}

// ---------------------------------------------------------------------------
// AgentPool
// ---------------------------------------------------------------------------

/// Owner of all agent storage and mutation.
///
/// Active agents are kept in creation order (the order the loop processes
/// them in); agents that reach `Closed` move to a bounded completed ring in
/// closure order, oldest evicted. The pool also accumulates the per-category
/// lifecycle counters.
#[derive(Debug)]
pub struct AgentPool {
    active: Vec<Agent>,
    completed: VecDeque<Agent>,
    completed_cap: usize,
    max_active: Option<usize>,
    counters: CycleCounters,
}

impl AgentPool {
    pub fn new(completed_cap: usize, max_active: Option<usize>) -> Self {
        Self {
            active: Vec::new(),
            completed: VecDeque::new(),
            completed_cap,
            max_active,
            counters: CycleCounters::default(),
        }
    }

    /// Spawn a new agent in `Traveling` state. Fails when the optional
    /// active-agent cap is reached.
    pub fn spawn(
        &mut self,
        archetype: &str,
        source_node: &str,
        target_node: Option<String>,
        payload: AgentPayload,
        created_at: DateTime<Utc>,
    ) -> Result<Agent, PoolError> {
        if let Some(cap) = self.max_active {
            if self.active.len() >= cap {
                return Err(PoolError::AtCapacity(cap));
            }
        }

        let agent = Agent::new(archetype, source_node, target_node, payload, created_at);
        info!(
            agent_id = %agent.id,
            archetype = %archetype,
            source = %source_node,
            "agent spawned"
        );
        self.counters.created += 1;
        self.active.push(agent.clone());
        Ok(agent)
    }

    /// Active agents in creation order, for the loop to step in place.
    pub fn active_mut(&mut self) -> &mut [Agent] {
        &mut self.active
    }

    pub fn active(&self) -> &[Agent] {
        &self.active
    }

    pub fn get(&self, id: Uuid) -> Option<&Agent> {
        self.active.iter().find(|a| a.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Completed agents, oldest closure first.
    pub fn completed(&self) -> impl Iterator<Item = &Agent> {
        self.completed.iter()
    }

    pub fn counters(&self) -> CycleCounters {
        self.counters
    }

    pub fn counters_mut(&mut self) -> &mut CycleCounters {
        &mut self.counters
    }

    /// Move every `Closed` agent from the active list to the completed ring,
    /// preserving closure order. Returns the number retired.
    pub fn retire_closed(&mut self) -> usize {
        let mut retired = 0;
        let mut index = 0;
        while index < self.active.len() {
            if self.active[index].state == AgentState::Closed {
                let agent = self.active.remove(index);
                debug!(agent_id = %agent.id, "agent retired to completed ring");
                self.completed.push_back(agent);
                retired += 1;
            } else {
                index += 1;
            }
        }
        while self.completed.len() > self.completed_cap {
            self.completed.pop_front();
        }
        retired
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
