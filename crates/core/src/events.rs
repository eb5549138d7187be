// Agent Event Protocol
//
// This module defines the event schema shared by live streaming and persisted
// thread logs. Every event has the same structure: type, payload, agent_name,
// timestamp and a background flag. Events are the source of truth for the
// conversation; display messages are projected from them.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Event Type Constants
// ============================================================================

// Turn input events
pub const PROMPT_STARTED: &str = "prompt_started";
pub const RESUME_WITH_INPUT: &str = "resume_with_input";

// Agent output events
pub const CHAT_OUTPUT: &str = "chat_output";
pub const REASONING_CONTENT: &str = "reasoning_content";
pub const WAIT_FOR_INPUT: &str = "wait_for_input";

// Turn lifecycle events
pub const TURN_END: &str = "turn_end";

/// Payload field holding displayable text in structured payloads
pub const CONTENT_FIELD: &str = "content";

// ============================================================================
// Event Kind
// ============================================================================

/// Event type discriminator.
///
/// The well-known kinds drive merging, projection and turn detection.
/// Anything else is carried through untouched as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PromptStarted,
    ResumeWithInput,
    ChatOutput,
    ReasoningContent,
    WaitForInput,
    TurnEnd,
    /// Pass-through type not interpreted by this crate
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PromptStarted => PROMPT_STARTED,
            EventKind::ResumeWithInput => RESUME_WITH_INPUT,
            EventKind::ChatOutput => CHAT_OUTPUT,
            EventKind::ReasoningContent => REASONING_CONTENT,
            EventKind::WaitForInput => WAIT_FOR_INPUT,
            EventKind::TurnEnd => TURN_END,
            EventKind::Other(name) => name,
        }
    }

    /// Check if this kind opens a user turn (new prompt or resumed input)
    pub fn starts_user_turn(&self) -> bool {
        matches!(self, EventKind::PromptStarted | EventKind::ResumeWithInput)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            PROMPT_STARTED => EventKind::PromptStarted,
            RESUME_WITH_INPUT => EventKind::ResumeWithInput,
            CHAT_OUTPUT => EventKind::ChatOutput,
            REASONING_CONTENT => EventKind::ReasoningContent,
            WAIT_FOR_INPUT => EventKind::WaitForInput,
            TURN_END => EventKind::TurnEnd,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from(s.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Event payload: either raw text or a structured mapping.
///
/// Structured payloads keep their displayable text in the `content` field.
/// Use [`Payload::text`] instead of inspecting the variants directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Map<String, Value>),
}

impl Payload {
    /// Resolve the displayable text of this payload.
    ///
    /// Plain text is returned as is. Structured payloads resolve to their
    /// `content` field, serialized if it is not a string, or empty if missing.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text.as_str()),
            Payload::Structured(map) => match map.get(CONTENT_FIELD) {
                Some(Value::String(text)) => Cow::Borrowed(text.as_str()),
                None | Some(Value::Null) => Cow::Borrowed(""),
                Some(other) => Cow::Owned(other.to_string()),
            },
        }
    }

    /// Get the structured mapping, if any
    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Structured(map) => Some(map),
            Payload::Text(_) => None,
        }
    }

    /// Get a field of a structured payload
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_structured().and_then(|map| map.get(name))
    }

    /// Return a copy whose displayable text is replaced.
    ///
    /// Structured payloads keep every other field.
    pub fn with_text(&self, text: impl Into<String>) -> Payload {
        match self {
            Payload::Text(_) => Payload::Text(text.into()),
            Payload::Structured(map) => {
                let mut map = map.clone();
                map.insert(CONTENT_FIELD.to_string(), Value::String(text.into()));
                Payload::Structured(map)
            }
        }
    }

    /// Concatenate `later` onto this payload, keeping this payload's shape
    pub fn merged_with(&self, later: &Payload) -> Payload {
        let mut text = self.text().into_owned();
        text.push_str(&later.text());
        self.with_text(text)
    }

    /// Convert into a JSON value (used when a payload is handed back to an API)
    pub fn into_value(self) -> Value {
        match self {
            Payload::Text(text) => Value::String(text),
            Payload::Structured(map) => Value::Object(map),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(String::new())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            Value::Object(map) => Payload::Structured(map),
            Value::Null => Payload::default(),
            other => Payload::Text(other.to_string()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Structured(map)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Payload::from)
    }
}

// ============================================================================
// Normalized Event
// ============================================================================

/// A normalized event as stored in the Event Log.
///
/// Identity (kind, agent, position in the log) is fixed once appended;
/// payload and timestamp may still change while the event is the log tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Event-specific payload
    pub payload: Payload,

    /// Name of the agent that emitted the event
    pub agent_name: String,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Set only for events received while a background session was live
    #[serde(default)]
    pub is_background: bool,
}

impl AgentEvent {
    /// Create a foreground event stamped with the current time
    pub fn new(
        kind: impl Into<EventKind>,
        agent_name: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            agent_name: agent_name.into(),
            timestamp: Utc::now(),
            is_background: false,
        }
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the background flag
    pub fn with_background(mut self, is_background: bool) -> Self {
        self.is_background = is_background;
        self
    }

    /// Check the event type
    pub fn is(&self, kind: &EventKind) -> bool {
        &self.kind == kind
    }

    /// Check which agent emitted the event
    pub fn is_from(&self, agent_name: &str) -> bool {
        self.agent_name == agent_name
    }

    /// Displayable text of the payload
    pub fn text(&self) -> Cow<'_, str> {
        self.payload.text()
    }

    /// Check if `next` must be folded into this event instead of appended.
    ///
    /// Only consecutive chat output from the same agent merges.
    pub fn merges_with(&self, next: &AgentEvent) -> bool {
        self.kind == EventKind::ChatOutput
            && next.kind == EventKind::ChatOutput
            && self.agent_name == next.agent_name
    }
}

// ============================================================================
// Raw (wire) Event
// ============================================================================

/// Event as delivered by a live subscription, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Emitting agent
    #[serde(alias = "agent_name")]
    pub agent: String,

    /// Event payload
    #[serde(default)]
    pub payload: Payload,

    /// Nesting depth of the emitting agent (0 for the addressed agent)
    #[serde(default)]
    pub depth: u32,
}

impl RawEvent {
    pub fn new(kind: impl Into<EventKind>, agent: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            kind: kind.into(),
            agent: agent.into(),
            payload: payload.into(),
            depth: 0,
        }
    }

    /// Normalize into a log event stamped with `timestamp`
    pub fn normalize(self, timestamp: DateTime<Utc>, is_background: bool) -> AgentEvent {
        AgentEvent {
            kind: self.kind,
            payload: self.payload,
            agent_name: self.agent,
            timestamp,
            is_background,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
