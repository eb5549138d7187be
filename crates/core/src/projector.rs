// Transcript Projector
//
// Pure derivation of display messages from the Event Log. Nothing here is
// cached: callers re-project whenever the log changes, and the same log
// always yields the same transcript.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event_log::EventLog;
use crate::events::{AgentEvent, EventKind, Payload, CONTENT_FIELD};

/// Payload field listing the keys a WAIT_FOR_INPUT event asks for
pub const REQUEST_KEYS_FIELD: &str = "request_keys";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

/// A display message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Agent {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    /// Agent asking for input. Once answered, `resume_values` holds the
    /// answer and the form is disabled.
    InputRequest {
        input_keys: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_values: Option<Payload>,
        form_disabled: bool,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>, reasoning: Option<String>) -> Self {
        Message::Agent {
            content: content.into(),
            reasoning,
        }
    }

    /// Empty agent message standing in for a response that has not started
    pub fn placeholder() -> Self {
        Message::agent("", None)
    }

    pub fn role(&self) -> MessageRole {
        match self {
            Message::User { .. } => MessageRole::User,
            Message::Agent { .. } | Message::InputRequest { .. } => MessageRole::Agent,
        }
    }

    /// Displayable text. Input requests have none.
    pub fn content(&self) -> &str {
        match self {
            Message::User { content } | Message::Agent { content, .. } => content,
            Message::InputRequest { .. } => "",
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Message::Agent { reasoning, .. } => reasoning.as_deref(),
            _ => None,
        }
    }
}

fn is_transcript_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::PromptStarted
            | EventKind::ResumeWithInput
            | EventKind::ChatOutput
            | EventKind::WaitForInput
    )
}

/// Project the Event Log into display messages for `agent_name`
pub fn project_transcript(log: &EventLog, agent_name: &str) -> Vec<Message> {
    // Keep each entry's position in the full log for the reasoning search
    let filtered: Vec<(usize, &AgentEvent)> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_from(agent_name) && !e.is_background && is_transcript_kind(&e.kind))
        .collect();

    let mut messages = Vec::with_capacity(filtered.len() + 1);

    for (position, (index, event)) in filtered.iter().enumerate() {
        let message = match event.kind {
            EventKind::PromptStarted | EventKind::ResumeWithInput => {
                let answers_form = position > 0 && filtered[position - 1].1.kind == EventKind::WaitForInput;
                Message::user(user_content(event, answers_form))
            }
            EventKind::WaitForInput => {
                let answer = filtered[position + 1..]
                    .iter()
                    .map(|(_, e)| *e)
                    .find(|e| e.kind.starts_user_turn() && e.agent_name == event.agent_name);
                Message::InputRequest {
                    input_keys: input_keys(&event.payload),
                    resume_values: answer.map(|e| e.payload.clone()),
                    form_disabled: answer.is_some(),
                }
            }
            EventKind::ChatOutput => Message::agent(event.text(), find_reasoning(log, *index)),
            _ => continue,
        };
        messages.push(message);
    }

    let ended = log
        .last()
        .map(|e| e.kind == EventKind::TurnEnd && e.is_from(agent_name))
        .unwrap_or(false);
    if !ended && matches!(messages.last(), Some(Message::User { .. })) {
        messages.push(Message::placeholder());
    }

    messages
}

/// Find the reasoning annotation for the chat output at `index`.
///
/// Looks backward first, stopping at the previous output or user turn, then
/// forward, additionally stopping at a turn end. Boundaries from any agent
/// stop the scan; only reasoning from the output's own agent matches.
pub fn find_reasoning(log: &EventLog, index: usize) -> Option<String> {
    let events = log.events();
    let agent = &events.get(index)?.agent_name;

    scan_reasoning(events[..index].iter().rev(), agent, false)
        .or_else(|| scan_reasoning(events[index + 1..].iter(), agent, true))
}

fn scan_reasoning<'a>(
    entries: impl Iterator<Item = &'a AgentEvent>,
    agent: &str,
    stop_at_turn_end: bool,
) -> Option<String> {
    for entry in entries {
        match entry.kind {
            EventKind::ReasoningContent if entry.agent_name == agent => {
                return Some(entry.text().into_owned())
            }
            EventKind::ChatOutput | EventKind::PromptStarted | EventKind::ResumeWithInput => {
                return None
            }
            EventKind::TurnEnd if stop_at_turn_end => return None,
            _ => {}
        }
    }
    None
}

/// Text shown for a user turn.
///
/// A turn answering an input request carries the submitted form as a
/// serialized mapping in `content`; its values are shown one per line.
fn user_content(event: &AgentEvent, answers_form: bool) -> String {
    if answers_form {
        match event.payload.field(CONTENT_FIELD) {
            Some(Value::String(serialized)) => {
                return match serde_json::from_str::<Map<String, Value>>(serialized) {
                    Ok(values) => join_values(&values),
                    Err(e) => {
                        tracing::warn!(
                            agent = %event.agent_name,
                            error = %e,
                            "Form submission is not a serialized mapping, showing it as text"
                        );
                        serialized.clone()
                    }
                };
            }
            Some(Value::Object(values)) => return join_values(values),
            _ => {}
        }
        // Persisted answers arrive unwrapped from `content`
        if let Payload::Text(text) = &event.payload {
            if let Ok(values) = serde_json::from_str::<Map<String, Value>>(text) {
                return join_values(&values);
            }
        }
    }
    event.text().into_owned()
}

fn join_values(values: &Map<String, Value>) -> String {
    values
        .values()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keys requested by a WAIT_FOR_INPUT payload, in payload order
fn input_keys(payload: &Payload) -> Map<String, Value> {
    match payload.field(REQUEST_KEYS_FIELD) {
        Some(Value::Object(keys)) => keys.clone(),
        _ => payload.as_structured().cloned().unwrap_or_default(),
    }
}
