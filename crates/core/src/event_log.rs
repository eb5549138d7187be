// Event Log
//
// Ordered, merge-aware sequence of normalized events. Insertion order is
// display order. Only the tail may be mutated: callers either append, fold a
// new chat-output fragment into the tail, or update the tail in place.
//
// Invariant: no two adjacent CHAT_OUTPUT entries from the same agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{AgentEvent, EventKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<AgentEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All entries in insertion order
    pub fn events(&self) -> &[AgentEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AgentEvent> {
        self.events.iter()
    }

    pub fn get(&self, index: usize) -> Option<&AgentEvent> {
        self.events.get(index)
    }

    pub fn last(&self) -> Option<&AgentEvent> {
        self.events.last()
    }

    /// Check if the tail is a CHAT_OUTPUT entry from `agent_name`
    pub fn tail_is_chat_output_from(&self, agent_name: &str) -> bool {
        self.last()
            .map(|e| e.kind == EventKind::ChatOutput && e.is_from(agent_name))
            .unwrap_or(false)
    }

    /// Append an event unchanged.
    ///
    /// Callers that may receive consecutive chat output must use
    /// [`EventLog::push_merging`] or update the tail themselves.
    pub fn push(&mut self, event: AgentEvent) {
        debug_assert!(
            !self.last().map(|tail| tail.merges_with(&event)).unwrap_or(false),
            "adjacent chat output from the same agent must be merged"
        );
        self.events.push(event);
    }

    /// Append `event`, folding it into the tail when both are chat output
    /// from the same agent.
    ///
    /// Merging concatenates the text (keeping the tail's structured fields)
    /// and takes the later timestamp. Returns true if the event was merged.
    pub fn push_merging(&mut self, event: AgentEvent) -> bool {
        if let Some(tail) = self.events.last_mut() {
            if tail.merges_with(&event) {
                tail.payload = tail.payload.merged_with(&event.payload);
                tail.timestamp = event.timestamp;
                return true;
            }
        }
        self.events.push(event);
        false
    }

    /// Mutate the tail entry in place. No-op on an empty log.
    pub fn update_tail(&mut self, f: impl FnOnce(&mut AgentEvent)) {
        if let Some(tail) = self.events.last_mut() {
            f(tail);
        }
    }

    /// Replace the tail's displayable text and timestamp, keeping its
    /// other payload fields. No-op on an empty log.
    pub fn replace_tail_text(&mut self, text: impl Into<String>, timestamp: DateTime<Utc>) {
        let text = text.into();
        self.update_tail(|tail| {
            tail.payload = tail.payload.with_text(text);
            tail.timestamp = timestamp;
        });
    }

    /// Drop every entry
    pub fn reset(&mut self) {
        self.events.clear();
    }

    /// Replace the whole log (thread identity changed)
    pub fn replace_all(&mut self, other: EventLog) {
        self.events = other.events;
    }

    pub fn into_events(self) -> Vec<AgentEvent> {
        self.events
    }
}

impl FromIterator<AgentEvent> for EventLog {
    /// Build a log by folding events through the merge rule
    fn from_iter<I: IntoIterator<Item = AgentEvent>>(iter: I) -> Self {
        let mut log = EventLog::new();
        for event in iter {
            log.push_merging(event);
        }
        log
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a AgentEvent;
    type IntoIter = std::slice::Iter<'a, AgentEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn chat(agent: &str, text: &str) -> AgentEvent {
        AgentEvent::new(EventKind::ChatOutput, agent, text)
    }

    #[test]
    fn test_consecutive_chat_output_merges() {
        let t0 = Utc::now();
        let mut log = EventLog::new();

        assert!(!log.push_merging(chat("A", "Hel").with_timestamp(t0)));
        assert!(log.push_merging(chat("A", "lo").with_timestamp(t0 + Duration::seconds(1))));
        assert!(log.push_merging(chat("A", "!").with_timestamp(t0 + Duration::seconds(2))));

        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].text(), "Hello!");
        assert_eq!(log.events()[0].timestamp, t0 + Duration::seconds(2));
    }

    #[test]
    fn test_different_agents_do_not_merge() {
        let mut log = EventLog::new();
        log.push_merging(chat("A", "one"));
        log.push_merging(chat("B", "two"));
        log.push_merging(chat("A", "three"));

        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_intervening_event_breaks_merge() {
        let mut log = EventLog::new();
        log.push_merging(chat("A", "one"));
        log.push_merging(AgentEvent::new(EventKind::ReasoningContent, "A", "hmm"));
        log.push_merging(chat("A", "two"));

        assert_eq!(log.len(), 3);
        assert_eq!(log.events()[2].text(), "two");
    }

    #[test]
    fn test_structured_merge_preserves_fields() {
        let mut log = EventLog::new();
        log.push_merging(AgentEvent::new(
            EventKind::ChatOutput,
            "A",
            json!({"content": "a", "model": "m1"}),
        ));
        log.push_merging(AgentEvent::new(
            EventKind::ChatOutput,
            "A",
            json!({"content": "b", "model": "m2"}),
        ));

        let tail = log.last().unwrap();
        assert_eq!(tail.text(), "ab");
        assert_eq!(tail.payload.field("model"), Some(&json!("m1")));
    }

    #[test]
    fn test_collect_applies_merge_rule() {
        let log: EventLog = vec![chat("A", "x"), chat("A", "y"), chat("B", "z")]
            .into_iter()
            .collect();

        assert_eq!(log.len(), 2);
        assert!(log.tail_is_chat_output_from("B"));
        assert!(!log.tail_is_chat_output_from("A"));
    }

    #[test]
    fn test_replace_tail_text() {
        let t0 = Utc::now();
        let mut log = EventLog::new();
        log.push(AgentEvent::new(
            EventKind::ChatOutput,
            "A",
            json!({"content": "draft", "format": "md"}),
        ));

        log.replace_tail_text("final", t0);

        let tail = log.last().unwrap();
        assert_eq!(tail.text(), "final");
        assert_eq!(tail.timestamp, t0);
        assert_eq!(tail.payload.field("format"), Some(&json!("md")));
    }

    #[test]
    fn test_update_tail_and_reset() {
        let mut log = EventLog::new();
        log.update_tail(|e| e.agent_name = "nobody".into());
        assert!(log.is_empty());

        log.push(AgentEvent::new(EventKind::TurnEnd, "A", ""));
        log.update_tail(|e| e.is_background = true);
        assert!(log.last().unwrap().is_background);

        log.reset();
        assert!(log.is_empty());
    }
}
