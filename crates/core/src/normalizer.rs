// Log Ingestion Normalizer
//
// Converts persisted thread-log records into an Event Log, applying the same
// consecutive chat-output merge rule the live stream uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_log::EventLog;
use crate::events::{AgentEvent, EventKind, Payload, CONTENT_FIELD};

/// A persisted historical record as returned by thread-log retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Event type name
    #[serde(alias = "type")]
    pub event_name: String,

    /// Stored event body. The payload is nested under `content` or
    /// `payload`, or is the body itself.
    #[serde(default)]
    pub event: Value,

    /// Agent that emitted the event
    #[serde(alias = "agent", alias = "agent_name")]
    pub agent_id: String,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(
        event_name: impl Into<String>,
        agent_id: impl Into<String>,
        event: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            event,
            agent_id: agent_id.into(),
            created_at,
        }
    }

    /// Extract the payload from the stored event body
    pub fn payload(&self) -> Payload {
        let nested = self
            .event
            .get(CONTENT_FIELD)
            .filter(|v| !v.is_null())
            .or_else(|| self.event.get("payload").filter(|v| !v.is_null()));

        match nested {
            Some(value) => Payload::from(value.clone()),
            None => Payload::from(self.event.clone()),
        }
    }

    /// Map the raw fields onto a foreground log event
    pub fn to_event(&self) -> AgentEvent {
        AgentEvent {
            kind: EventKind::from(self.event_name.as_str()),
            payload: self.payload(),
            agent_name: self.agent_id.clone(),
            timestamp: self.created_at,
            is_background: false,
        }
    }
}

/// Normalize a batch of persisted records into an Event Log.
///
/// Records keep their order; consecutive chat output from the same agent is
/// folded into one entry. An empty batch yields an empty log.
pub fn normalize_logs<'a, I>(records: I) -> EventLog
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let log: EventLog = records.into_iter().map(LogRecord::to_event).collect();
    tracing::debug!(entries = log.len(), "Normalized thread logs");
    log
}
