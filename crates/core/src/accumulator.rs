// Stream Accumulator
//
// Applies live events from one session to the Event Log. Chat output fragments
// are gathered in a streaming buffer that is mirrored into the log tail, so a
// reader always sees the growing message as a single entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::detector::TurnCompletionDetector;
use crate::event_log::EventLog;
use crate::events::{AgentEvent, EventKind, RawEvent};

/// Called with each chat output fragment as it arrives
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once when the turn completes
pub type CompleteFn = Box<dyn FnOnce() + Send>;

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    TurnComplete,
}

impl Step {
    pub fn is_turn_complete(self) -> bool {
        self == Step::TurnComplete
    }
}

/// Per-session event accumulator
pub struct StreamAccumulator {
    agent_name: String,
    is_background: bool,
    detector: Arc<dyn TurnCompletionDetector>,
    buffer: String,
    /// Kind of the previously received event
    last_received: Option<EventKind>,
    on_progress: Option<ProgressFn>,
    on_complete: Option<CompleteFn>,
    completed: bool,
}

impl StreamAccumulator {
    pub fn new(
        agent_name: impl Into<String>,
        is_background: bool,
        detector: Arc<dyn TurnCompletionDetector>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            is_background,
            detector,
            buffer: String::new(),
            last_received: None,
            on_progress: None,
            on_complete: None,
            completed: false,
        }
    }

    pub fn with_progress(mut self, on_progress: Option<ProgressFn>) -> Self {
        self.on_progress = on_progress;
        self
    }

    pub fn with_completion(mut self, on_complete: Option<CompleteFn>) -> Self {
        self.on_complete = on_complete;
        self
    }

    /// Text of the chat output currently being streamed
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn last_kind(&self) -> Option<&EventKind> {
        self.last_received.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Apply a raw event received now
    pub fn apply(&mut self, raw: RawEvent, log: &mut EventLog) -> Step {
        self.apply_at(raw, Utc::now(), log)
    }

    /// Apply a raw event, stamping it with `received_at`
    pub fn apply_at(&mut self, raw: RawEvent, received_at: DateTime<Utc>, log: &mut EventLog) -> Step {
        let event = raw.normalize(received_at, self.is_background);

        match event.kind {
            EventKind::ChatOutput => self.apply_chat_output(&event, log),
            // Reasoning is kept even for background sessions
            EventKind::ReasoningContent => log.push(event.clone()),
            _ if !self.is_background => log.push(event.clone()),
            _ => {
                tracing::trace!(kind = %event.kind, agent = %event.agent_name, "Background event not logged");
            }
        }

        self.last_received = Some(event.kind.clone());

        if !self.completed && self.detector.is_turn_complete(&self.agent_name, &event) {
            self.completed = true;
            return Step::TurnComplete;
        }
        Step::Continue
    }

    /// Run the completion callback (once) and return the final buffer
    pub fn finish(&mut self) -> String {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
        self.buffer.clone()
    }

    fn apply_chat_output(&mut self, event: &AgentEvent, log: &mut EventLog) {
        if self.last_received != Some(EventKind::ChatOutput) {
            self.buffer.clear();
        }

        let fragment = event.text();
        self.buffer.push_str(&fragment);
        if let Some(on_progress) = &self.on_progress {
            on_progress(&fragment);
        }

        if log.tail_is_chat_output_from(&event.agent_name) {
            log.replace_tail_text(self.buffer.clone(), event.timestamp);
        } else {
            let mut entry = event.clone();
            entry.payload = event.payload.with_text(self.buffer.clone());
            log.push(entry);
        }
    }
}

impl std::fmt::Debug for StreamAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAccumulator")
            .field("agent_name", &self.agent_name)
            .field("is_background", &self.is_background)
            .field("buffer", &self.buffer)
            .field("last_received", &self.last_received)
            .field("completed", &self.completed)
            .finish()
    }
}
