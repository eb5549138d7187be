// Conversation Stream Core
//
// This crate turns the events a conversational agent emits, live or
// persisted, into a canonical Event Log and a display-ready transcript.
//
// Key design decisions:
// - Events are the source of truth; transcript messages are projected on demand
// - Live streams and persisted logs share one merge rule for chat output
// - Transports plug in through traits (EventSubscriber, AgentApi)
// - Exactly one live session at a time, owned by SessionController
// - Turn completion is a pluggable predicate (TurnCompletionDetector)

// Event schema and log
pub mod event_log;
pub mod events;

// Pipeline components
pub mod accumulator;
pub mod detector;
pub mod normalizer;
pub mod projector;
pub mod session;

// Facade driven by presentation layers
pub mod chat;

pub mod config;
pub mod error;
pub mod traits;

// Structured logging setup
pub mod telemetry;

// In-memory collaborators for tests and local development
pub mod memory;

// Re-exports for convenience
pub use accumulator::{CompleteFn, ProgressFn, Step, StreamAccumulator};
pub use chat::{ChatSession, TurnCallbacks};
pub use config::ChatConfig;
pub use detector::{TurnCompletionDetector, TurnEndDetector};
pub use error::{ChatError, Result};
pub use event_log::EventLog;
pub use events::{AgentEvent, EventKind, Payload, RawEvent};
pub use memory::{ApiCall, ChannelSubscriber, EventFeed, InMemoryAgentApi};
pub use normalizer::{normalize_logs, LogRecord};
pub use projector::{find_reasoning, project_transcript, Message, MessageRole};
pub use session::{
    Completion, CompletionLatch, SessionController, SessionHandle, SessionOutcome, Subscription,
};
pub use traits::{AgentApi, EventSender, EventSubscriber, RequestReceipt, StreamRequest};
