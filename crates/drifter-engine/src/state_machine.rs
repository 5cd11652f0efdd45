use drifter_core::types::AgentState;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// AgentEvent
// ---------------------------------------------------------------------------

/// Events the orchestrator loop feeds into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    /// Routing selected a new current node this cycle.
    Hop,
    /// The arrival node accepted the agent.
    Admit,
    /// The arrival node rejected the agent.
    Deny,
    /// Lifespan elapsed, landing completed, or the agent was force-expired.
    Expire,
    /// One cycle in `Expiring` has passed; remove from the active set.
    Close,
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentEvent::Hop => "Hop",
            AgentEvent::Admit => "Admit",
            AgentEvent::Deny => "Deny",
            AgentEvent::Expire => "Expire",
            AgentEvent::Close => "Close",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An invalid state transition was attempted.
///
/// Contains the current state and the event that could not be applied. The
/// orchestrator treats this as a per-agent processing fault: the agent is
/// force-expired and the loop continues.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition {
        state: AgentState,
        event: AgentEvent,
    },
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Attempt a state transition driven by `event`.
///
/// Valid transitions:
/// - Traveling + Hop    -> Arriving
/// - Arriving  + Admit  -> Admitted
/// - Arriving  + Deny   -> Traveling
/// - Admitted  + Expire -> Expiring   (an agent dissolves upon landing)
/// - Traveling + Expire -> Expiring   (lifespan preempts routing)
/// - Arriving  + Expire -> Expiring   (lifespan preempts admission)
/// - Expiring  + Close  -> Closed
///
/// `Traveling + Expire` and `Arriving + Expire` also cover force-expiry of
/// faulted agents. There is no `Traveling -> Traveling` event: a cycle with
/// no valid hop leaves the agent untouched.
pub fn transition(state: AgentState, event: AgentEvent) -> Result<AgentState, StateMachineError> {
    let next = match (state, event) {
        (AgentState::Traveling, AgentEvent::Hop) => AgentState::Arriving,
        (AgentState::Arriving, AgentEvent::Admit) => AgentState::Admitted,
        (AgentState::Arriving, AgentEvent::Deny) => AgentState::Traveling,
        (AgentState::Admitted, AgentEvent::Expire) => AgentState::Expiring,
        (AgentState::Traveling, AgentEvent::Expire) => AgentState::Expiring,
        (AgentState::Arriving, AgentEvent::Expire) => AgentState::Expiring,
        (AgentState::Expiring, AgentEvent::Close) => AgentState::Closed,
        _ => {
            return Err(StateMachineError::InvalidTransition { state, event });
        }
    };

    tracing::debug!(from = %state, event = %event, to = %next, "agent state transition");
    Ok(next)
}

/// Returns `true` if the given event is valid in the given state.
pub fn valid(state: AgentState, event: AgentEvent) -> bool {
    matches!(
        (state, event),
        (AgentState::Traveling, AgentEvent::Hop)
            | (AgentState::Arriving, AgentEvent::Admit)
            | (AgentState::Arriving, AgentEvent::Deny)
            | (AgentState::Admitted, AgentEvent::Expire)
            | (AgentState::Traveling, AgentEvent::Expire)
            | (AgentState::Arriving, AgentEvent::Expire)
            | (AgentState::Expiring, AgentEvent::Close)
    )
}
