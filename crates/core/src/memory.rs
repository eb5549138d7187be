// In-memory collaborators for tests and local development
//
// ChannelSubscriber hands every subscription's sender back to the caller, so
// tests and demos drive live streams by hand. InMemoryAgentApi answers
// requests locally, records every call and serves seeded thread logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::events::RawEvent;
use crate::normalizer::LogRecord;
use crate::session::Subscription;
use crate::traits::{AgentApi, EventSender, EventSubscriber, RequestReceipt, StreamRequest};

// ============================================================================
// ChannelSubscriber - live delivery driven by the caller
// ============================================================================

/// Caller-side handle of one subscription
#[derive(Debug, Clone)]
pub struct EventFeed {
    request: StreamRequest,
    sender: EventSender,
    releases: Arc<AtomicUsize>,
}

impl EventFeed {
    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Deliver an event. Returns false once the consumer is gone.
    pub fn send(&self, event: RawEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// How many times the release function ran (0 or 1)
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }
}

#[derive(Debug, Default)]
struct ChannelSubscriberState {
    feeds: Vec<EventFeed>,
    fail_next: Option<String>,
}

/// Subscriber whose events are pushed by the caller through [`EventFeed`]s
#[derive(Debug, Default, Clone)]
pub struct ChannelSubscriber {
    state: Arc<Mutex<ChannelSubscriberState>>,
}

impl ChannelSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelSubscriberState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next subscribe call fail with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    /// Feed of the `index`-th subscription, in subscribe order
    pub fn feed(&self, index: usize) -> Option<EventFeed> {
        self.lock().feeds.get(index).cloned()
    }

    /// Feed of the most recent subscription
    pub fn latest(&self) -> Option<EventFeed> {
        self.lock().feeds.last().cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().feeds.len()
    }
}

impl EventSubscriber for ChannelSubscriber {
    fn subscribe(&self, request: &StreamRequest, events: EventSender) -> Result<Subscription> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(ChatError::subscription(message));
        }

        let releases = Arc::new(AtomicUsize::new(0));
        state.feeds.push(EventFeed {
            request: request.clone(),
            sender: events,
            releases: Arc::clone(&releases),
        });

        Ok(Subscription::new(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

// ============================================================================
// InMemoryAgentApi - request/response collaborator
// ============================================================================

/// A call received by [`InMemoryAgentApi`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    SendPrompt {
        agent_path: String,
        prompt: String,
        thread_id: Option<String>,
    },
    ResumeWithInput {
        agent_path: String,
        values: Map<String, Value>,
        thread_id: String,
    },
    FetchThreadLogs {
        agent_path: String,
        thread_id: String,
    },
    NotifyThreadsChanged {
        agent_path: String,
    },
}

#[derive(Debug, Default)]
struct InMemoryAgentApiState {
    calls: Vec<ApiCall>,
    thread_logs: HashMap<String, Vec<LogRecord>>,
    fail_requests: Option<String>,
    fail_thread_logs: Option<String>,
}

/// Agent API answering locally.
///
/// Request ids are sequential (`req-1`, `req-2`, ...). A prompt without a
/// thread starts a fresh `thread-<uuid>` thread.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAgentApi {
    state: Arc<RwLock<InMemoryAgentApiState>>,
    next_request: Arc<AtomicUsize>,
}

impl InMemoryAgentApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the persisted logs of a thread
    pub async fn seed_thread_logs(&self, thread_id: impl Into<String>, records: Vec<LogRecord>) {
        self.state
            .write()
            .await
            .thread_logs
            .insert(thread_id.into(), records);
    }

    /// Make prompt and resume requests fail until cleared
    pub async fn fail_requests(&self, message: impl Into<String>) {
        self.state.write().await.fail_requests = Some(message.into());
    }

    /// Make thread log fetches fail until cleared
    pub async fn fail_thread_logs(&self, message: impl Into<String>) {
        self.state.write().await.fail_thread_logs = Some(message.into());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.fail_requests = None;
        state.fail_thread_logs = None;
    }

    /// All calls received so far, in order
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn notify_count(&self) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, ApiCall::NotifyThreadsChanged { .. }))
            .count()
    }

    fn next_request_id(&self) -> String {
        format!("req-{}", self.next_request.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl AgentApi for InMemoryAgentApi {
    async fn send_prompt(
        &self,
        agent_path: &str,
        prompt: &str,
        thread_id: Option<&str>,
    ) -> Result<RequestReceipt> {
        let mut state = self.state.write().await;
        state.calls.push(ApiCall::SendPrompt {
            agent_path: agent_path.to_string(),
            prompt: prompt.to_string(),
            thread_id: thread_id.map(str::to_string),
        });
        if let Some(message) = &state.fail_requests {
            return Err(ChatError::request(message.clone()));
        }

        let thread_id = thread_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread-{}", Uuid::now_v7()));
        Ok(RequestReceipt::new(self.next_request_id(), thread_id))
    }

    async fn resume_with_input(
        &self,
        agent_path: &str,
        values: &Map<String, Value>,
        thread_id: &str,
    ) -> Result<RequestReceipt> {
        let mut state = self.state.write().await;
        state.calls.push(ApiCall::ResumeWithInput {
            agent_path: agent_path.to_string(),
            values: values.clone(),
            thread_id: thread_id.to_string(),
        });
        if let Some(message) = &state.fail_requests {
            return Err(ChatError::request(message.clone()));
        }
        Ok(RequestReceipt::new(self.next_request_id(), thread_id))
    }

    async fn fetch_thread_logs(&self, agent_path: &str, thread_id: &str) -> Result<Vec<LogRecord>> {
        let mut state = self.state.write().await;
        state.calls.push(ApiCall::FetchThreadLogs {
            agent_path: agent_path.to_string(),
            thread_id: thread_id.to_string(),
        });
        if let Some(message) = &state.fail_thread_logs {
            return Err(ChatError::thread_logs(message.clone()));
        }
        Ok(state.thread_logs.get(thread_id).cloned().unwrap_or_default())
    }

    async fn notify_threads_changed(&self, agent_path: &str) -> Result<()> {
        self.state
            .write()
            .await
            .calls
            .push(ApiCall::NotifyThreadsChanged {
                agent_path: agent_path.to_string(),
            });
        Ok(())
    }
}
