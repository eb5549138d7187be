// Collaborator traits
//
// The chat session never talks to a transport directly. Live events arrive
// through an EventSubscriber; prompts, resumes and history go through an
// AgentApi. In-memory implementations live in `memory`, HTTP/SSE ones in the
// CLI crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::RawEvent;
use crate::normalizer::LogRecord;
use crate::session::Subscription;

/// Channel half a subscriber delivers raw events into
pub type EventSender = mpsc::UnboundedSender<RawEvent>;

/// Everything needed to open a live event stream for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub agent_path: String,
    pub agent_name: String,
    pub request_id: String,
    pub thread_id: String,
}

/// Identifiers returned when a prompt or resume request is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReceipt {
    pub request_id: String,
    pub thread_id: String,
}

impl RequestReceipt {
    pub fn new(request_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

// ============================================================================
// EventSubscriber - live event delivery
// ============================================================================

/// Opens live event streams.
///
/// Events for the request must be sent into `events` in delivery order until
/// the returned subscription is released.
pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, request: &StreamRequest, events: EventSender) -> Result<Subscription>;
}

// ============================================================================
// AgentApi - request/response collaborator
// ============================================================================

#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Start a new turn with a text prompt. `thread_id` of `None` starts a
    /// new thread.
    async fn send_prompt(
        &self,
        agent_path: &str,
        prompt: &str,
        thread_id: Option<&str>,
    ) -> Result<RequestReceipt>;

    /// Continue a turn that is waiting for input
    async fn resume_with_input(
        &self,
        agent_path: &str,
        values: &Map<String, Value>,
        thread_id: &str,
    ) -> Result<RequestReceipt>;

    /// Fetch the persisted history of a thread
    async fn fetch_thread_logs(&self, agent_path: &str, thread_id: &str) -> Result<Vec<LogRecord>>;

    /// Tell interested parties that the thread list may have changed
    async fn notify_threads_changed(&self, _agent_path: &str) -> Result<()> {
        Ok(())
    }
}
