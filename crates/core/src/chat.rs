// Chat Session
//
// Facade a presentation layer drives. It owns the Event Log, the thread
// identity and the single live session, and wires the accumulator of each
// session to the shared log.
//
// Every live session gets one consumer task that drains its subscription
// channel in arrival order. State is shared behind a tokio Mutex; the lock is
// never held across a call into the AgentApi.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::accumulator::{CompleteFn, ProgressFn, StreamAccumulator};
use crate::config::ChatConfig;
use crate::detector::{TurnCompletionDetector, TurnEndDetector};
use crate::error::{ChatError, Result};
use crate::event_log::EventLog;
use crate::events::{AgentEvent, RawEvent};
use crate::normalizer::normalize_logs;
use crate::projector::{project_transcript, Message};
use crate::session::{Completion, CompletionLatch, SessionController, SessionHandle, SessionOutcome};
use crate::traits::{AgentApi, EventSubscriber, RequestReceipt, StreamRequest};

/// Optional callbacks for an attended send
#[derive(Default)]
pub struct TurnCallbacks {
    pub on_progress: Option<ProgressFn>,
    pub on_complete: Option<CompleteFn>,
}

impl TurnCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive each chat output fragment as it streams in
    pub fn on_progress(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Run once when the turn completes
    pub fn on_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for TurnCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct ChatState {
    log: EventLog,
    thread_id: Option<String>,
    controller: SessionController,
    /// Attended sends in flight; overlapping sends each hold one count
    attended_sends: usize,
    is_loading_thread_logs: bool,
}

/// Conversation with one agent.
///
/// Cheap to clone; clones share the same conversation.
#[derive(Clone)]
pub struct ChatSession {
    config: Arc<ChatConfig>,
    api: Arc<dyn AgentApi>,
    subscriber: Arc<dyn EventSubscriber>,
    detector: Arc<dyn TurnCompletionDetector>,
    state: Arc<Mutex<ChatState>>,
}

impl ChatSession {
    pub fn new(
        config: ChatConfig,
        api: Arc<dyn AgentApi>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            api,
            subscriber,
            detector: Arc::new(TurnEndDetector),
            state: Arc::new(Mutex::new(ChatState::default())),
        }
    }

    /// Replace the default turn completion detector
    pub fn with_detector(mut self, detector: Arc<dyn TurnCompletionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a prompt and wait for the agent's turn to end.
    ///
    /// `is_sending` stays raised until every attended send in flight has
    /// returned. If a newer session or [`ChatSession::cancel_stream`]
    /// revokes this one first, the result is `ChatError::Revoked`.
    pub async fn send_prompt(&self, prompt: &str, callbacks: TurnCallbacks) -> Result<SessionOutcome> {
        let thread_id = self.begin_attended().await;

        let result = async {
            let receipt = self
                .api
                .send_prompt(&self.config.agent_path, prompt, thread_id.as_deref())
                .await
                .inspect_err(|e| tracing::error!(error = %e, "Failed to send prompt"))?;
            self.adopt_thread(&receipt).await;
            self.start_session(&receipt, false, callbacks).await?.wait().await
        }
        .await;

        self.end_attended().await;
        result
    }

    /// Send a prompt without waiting.
    ///
    /// Returns once the request is accepted; the turn streams into the log in
    /// background mode. Only reasoning and chat output are logged, flagged as
    /// background so they stay out of the transcript.
    pub async fn send_background_prompt(&self, prompt: &str) -> Result<RequestReceipt> {
        let thread_id = self.thread_id().await;

        let receipt = self
            .api
            .send_prompt(&self.config.agent_path, prompt, thread_id.as_deref())
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to send background prompt"))?;
        self.adopt_thread(&receipt).await;

        // Nobody awaits the outcome of a background turn
        drop(self.start_session(&receipt, true, TurnCallbacks::default()).await?);
        Ok(receipt)
    }

    /// Answer a pending input request on the current thread and wait for
    /// the turn to end.
    pub async fn resume_with_input(
        &self,
        values: Map<String, Value>,
        callbacks: TurnCallbacks,
    ) -> Result<SessionOutcome> {
        let Some(thread_id) = self.begin_attended().await else {
            self.end_attended().await;
            return Err(ChatError::NoThread);
        };

        let result = async {
            let receipt = self
                .api
                .resume_with_input(&self.config.agent_path, &values, &thread_id)
                .await
                .inspect_err(|e| tracing::error!(error = %e, thread_id = %thread_id, "Failed to resume"))?;
            self.adopt_thread(&receipt).await;
            self.start_session(&receipt, false, callbacks).await?.wait().await
        }
        .await;

        self.end_attended().await;
        result
    }

    /// Release the live session, if any. Safe to call at any time.
    pub async fn cancel_stream(&self) {
        if self.state.lock().await.controller.cancel() {
            tracing::debug!("Stream cancelled");
        }
    }

    // ========================================================================
    // Thread identity
    // ========================================================================

    /// Switch threads.
    ///
    /// Clearing the thread clears the log. Switching to a different thread
    /// replaces the log with that thread's persisted history.
    pub async fn set_thread_id(&self, thread_id: Option<String>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.thread_id == thread_id {
                return Ok(());
            }
            state.thread_id = thread_id.clone();
            if thread_id.is_none() {
                tracing::debug!("Thread cleared");
                state.log.reset();
                return Ok(());
            }
        }
        self.refresh_thread_logs().await
    }

    /// Reload the current thread's history, replacing the log.
    ///
    /// On failure the log is left as it was.
    pub async fn refresh_thread_logs(&self) -> Result<()> {
        let thread_id = {
            let mut state = self.state.lock().await;
            let Some(thread_id) = state.thread_id.clone() else {
                state.log.reset();
                return Ok(());
            };
            state.is_loading_thread_logs = true;
            thread_id
        };

        tracing::debug!(thread_id = %thread_id, "Loading thread logs");
        let fetched = self
            .api
            .fetch_thread_logs(&self.config.agent_path, &thread_id)
            .await;

        let mut state = self.state.lock().await;
        state.is_loading_thread_logs = false;
        let records = fetched
            .inspect_err(|e| tracing::error!(error = %e, thread_id = %thread_id, "Failed to load thread logs"))?;

        if state.thread_id.as_deref() != Some(thread_id.as_str()) {
            tracing::debug!(thread_id = %thread_id, "Thread changed while loading, discarding logs");
            return Ok(());
        }
        state.log.replace_all(normalize_logs(&records));
        tracing::info!(thread_id = %thread_id, entries = state.log.len(), "Thread logs loaded");
        Ok(())
    }

    // ========================================================================
    // Observable state
    // ========================================================================

    /// Snapshot of the Event Log
    pub async fn event_log(&self) -> EventLog {
        self.state.lock().await.log.clone()
    }

    pub async fn events(&self) -> Vec<AgentEvent> {
        self.state.lock().await.log.events().to_vec()
    }

    /// Transcript projected from the current log
    pub async fn messages(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        project_transcript(&state.log, &self.config.agent_name)
    }

    pub async fn is_sending(&self) -> bool {
        self.state.lock().await.attended_sends > 0
    }

    pub async fn is_loading_thread_logs(&self) -> bool {
        self.state.lock().await.is_loading_thread_logs
    }

    pub async fn thread_id(&self) -> Option<String> {
        self.state.lock().await.thread_id.clone()
    }

    pub async fn has_live_session(&self) -> bool {
        self.state.lock().await.controller.is_active()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn begin_attended(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.attended_sends += 1;
        state.thread_id.clone()
    }

    async fn end_attended(&self) {
        let mut state = self.state.lock().await;
        state.attended_sends = state.attended_sends.saturating_sub(1);
    }

    /// Take the thread a request ran on as the current thread. The log is
    /// kept: the request continues the conversation it already holds.
    async fn adopt_thread(&self, receipt: &RequestReceipt) {
        let mut state = self.state.lock().await;
        if state.thread_id.as_deref() != Some(receipt.thread_id.as_str()) {
            tracing::debug!(thread_id = %receipt.thread_id, "Adopted thread");
            state.thread_id = Some(receipt.thread_id.clone());
        }
    }

    /// Revoke any live session and subscribe for `receipt`
    async fn start_session(
        &self,
        receipt: &RequestReceipt,
        is_background: bool,
        callbacks: TurnCallbacks,
    ) -> Result<Completion> {
        let request = StreamRequest {
            agent_path: self.config.agent_path.clone(),
            agent_name: self.config.agent_name.clone(),
            request_id: receipt.request_id.clone(),
            thread_id: receipt.thread_id.clone(),
        };
        let accumulator = StreamAccumulator::new(
            self.config.agent_name.clone(),
            is_background,
            Arc::clone(&self.detector),
        )
        .with_progress(callbacks.on_progress)
        .with_completion(callbacks.on_complete);
        let (latch, completion) = CompletionLatch::new();

        let mut state = self.state.lock().await;
        state
            .controller
            .start(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let subscription = self.subscriber.subscribe(&request, tx)?;
                let handle = SessionHandle::new(
                    &request.request_id,
                    &request.thread_id,
                    is_background,
                    subscription,
                );
                let consumer = tokio::spawn(consume_session(
                    SessionTask {
                        session_id: handle.id,
                        request,
                        state: Arc::clone(&self.state),
                        api: Arc::clone(&self.api),
                        accumulator,
                        latch,
                    },
                    rx,
                ));
                Ok(handle.with_consumer(consumer))
            })
            .inspect_err(|e| {
                tracing::error!(error = %e, request_id = %receipt.request_id, "Failed to subscribe to events")
            })?;

        Ok(completion)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything a session's consumer task owns
struct SessionTask {
    session_id: Uuid,
    request: StreamRequest,
    state: Arc<Mutex<ChatState>>,
    api: Arc<dyn AgentApi>,
    accumulator: StreamAccumulator,
    latch: CompletionLatch,
}

/// Drain one session's events into the shared log until its turn ends
async fn consume_session(mut task: SessionTask, mut events: mpsc::UnboundedReceiver<RawEvent>) {
    while let Some(raw) = events.recv().await {
        let step = {
            let mut state = task.state.lock().await;
            if !state.controller.is_current(task.session_id) {
                tracing::debug!(session_id = %task.session_id, "Session revoked, dropping event");
                return;
            }
            let step = task.accumulator.apply(raw, &mut state.log);
            if step.is_turn_complete() {
                state.controller.release_if_current(task.session_id);
            }
            step
        };

        if step.is_turn_complete() {
            let output = task.accumulator.finish();
            tracing::info!(
                request_id = %task.request.request_id,
                thread_id = %task.request.thread_id,
                "Turn completed"
            );
            if let Err(e) = task.api.notify_threads_changed(&task.request.agent_path).await {
                tracing::warn!(error = %e, "Failed to notify thread change");
            }
            task.latch.settle(Ok(SessionOutcome {
                request_id: task.request.request_id,
                thread_id: task.request.thread_id,
                output,
            }));
            return;
        }
    }

    // Delivery ended without a turn end
    let released = task
        .state
        .lock()
        .await
        .controller
        .release_if_current(task.session_id);
    if released {
        tracing::warn!(request_id = %task.request.request_id, "Event stream closed before the turn completed");
        task.latch.settle(Err(ChatError::subscription(
            "event stream closed before the turn completed",
        )));
    }
}
