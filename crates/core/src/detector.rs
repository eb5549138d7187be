// Turn Completion Detection
//
// Decides whether an event concludes the addressed agent's turn. The stream
// accumulator treats the answer as opaque and only acts on `true`.

use crate::events::{AgentEvent, EventKind};

/// Predicate over (addressed agent name, event).
pub trait TurnCompletionDetector: Send + Sync {
    fn is_turn_complete(&self, agent_name: &str, event: &AgentEvent) -> bool;
}

/// Plain closures work as detectors
impl<F> TurnCompletionDetector for F
where
    F: Fn(&str, &AgentEvent) -> bool + Send + Sync,
{
    fn is_turn_complete(&self, agent_name: &str, event: &AgentEvent) -> bool {
        self(agent_name, event)
    }
}

/// Default detector: a `turn_end` emitted by the addressed agent.
///
/// Sub-agents end their own turns too; those are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnEndDetector;

impl TurnCompletionDetector for TurnEndDetector {
    fn is_turn_complete(&self, agent_name: &str, event: &AgentEvent) -> bool {
        event.kind == EventKind::TurnEnd && event.agent_name.eq_ignore_ascii_case(agent_name)
    }
}
