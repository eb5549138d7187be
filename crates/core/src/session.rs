// Stream Session Control
//
// A session is one live subscription plus the task consuming it. At most one
// session exists at a time: starting a new one releases the previous one first,
// whether it was attended or running in the background.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ChatError, Result};

// ============================================================================
// Subscription
// ============================================================================

/// Function tearing down a live event delivery
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Live event delivery returned by an `EventSubscriber`.
///
/// Releasing is idempotent: the release function runs at most once, either
/// through [`Subscription::release`] or when the subscription is dropped.
pub struct Subscription {
    release: Option<ReleaseFn>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription with nothing to tear down
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// Outcome contract
// ============================================================================

/// Successful end of a streamed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub request_id: String,
    pub thread_id: String,
    /// Text of the last chat output streamed during the turn
    pub output: String,
}

/// Settling side of a session's outcome contract. Settles at most once.
#[derive(Debug)]
pub struct CompletionLatch {
    tx: Option<oneshot::Sender<Result<SessionOutcome>>>,
}

/// Awaiting side of a session's outcome contract
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<SessionOutcome>>,
}

impl CompletionLatch {
    pub fn new() -> (CompletionLatch, Completion) {
        let (tx, rx) = oneshot::channel();
        (CompletionLatch { tx: Some(tx) }, Completion { rx })
    }

    /// Settle the contract. Returns false if it was already settled.
    pub fn settle(&mut self, outcome: Result<SessionOutcome>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // Nobody awaiting (background send) is fine
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.is_none()
    }
}

impl Completion {
    /// Wait for the turn to end.
    ///
    /// Resolves to `ChatError::Revoked` if the session was released before
    /// the contract settled.
    pub async fn wait(self) -> Result<SessionOutcome> {
        self.rx.await.unwrap_or(Err(ChatError::Revoked))
    }
}

// ============================================================================
// Session handle
// ============================================================================

/// One live subscription and the task consuming its events
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub request_id: String,
    pub thread_id: String,
    pub is_background: bool,
    subscription: Subscription,
    consumer: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn new(
        request_id: impl Into<String>,
        thread_id: impl Into<String>,
        is_background: bool,
        subscription: Subscription,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id: request_id.into(),
            thread_id: thread_id.into(),
            is_background,
            subscription,
            consumer: None,
        }
    }

    /// Attach the task consuming this session's events
    pub fn with_consumer(mut self, consumer: JoinHandle<()>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Tear down delivery and stop the consumer. Idempotent.
    pub fn release(&mut self) {
        self.subscription.release();
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
    }

    pub fn is_released(&self) -> bool {
        self.subscription.is_released()
    }
}

// ============================================================================
// SessionController
// ============================================================================

/// Owns the single live session
#[derive(Debug, Default)]
pub struct SessionController {
    active: Option<SessionHandle>,
}

impl SessionController {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Release any existing session, then establish a new one.
    ///
    /// If `establish` fails nothing is stored and the error is returned.
    pub fn start<F>(&mut self, establish: F) -> Result<&SessionHandle>
    where
        F: FnOnce() -> Result<SessionHandle>,
    {
        self.cancel();
        let handle = establish()?;
        tracing::debug!(
            session_id = %handle.id,
            request_id = %handle.request_id,
            background = handle.is_background,
            "Session started"
        );
        Ok(&*self.active.insert(handle))
    }

    /// Release the active session, if any. Safe to call at any time.
    ///
    /// Returns true if a session was released.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(mut handle) => {
                tracing::debug!(
                    session_id = %handle.id,
                    background = handle.is_background,
                    "Releasing session"
                );
                handle.release();
                true
            }
            None => false,
        }
    }

    /// Called by a session's own consumer when its turn has ended.
    ///
    /// Releases the subscription but leaves the consumer task running so it
    /// can settle its outcome. No-op if `session_id` is no longer current.
    pub fn release_if_current(&mut self, session_id: Uuid) -> bool {
        if !self.is_current(session_id) {
            return false;
        }
        match self.active.take() {
            Some(mut handle) => {
                handle.subscription.release();
                // Detach rather than abort: the caller is that task
                drop(handle.consumer.take());
                true
            }
            None => false,
        }
    }

    pub fn is_current(&self, session_id: Uuid) -> bool {
        self.active
            .as_ref()
            .map(|h| h.id == session_id)
            .unwrap_or(false)
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}
