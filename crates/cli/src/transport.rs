// HTTP/SSE collaborators for ChatSession
//
// HttpAgentApi maps the request/response calls onto the agent REST routes.
// SseSubscriber opens `getevents` as a server-sent event stream on a spawned
// task; releasing the subscription aborts that task.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use threadline_core::traits::{AgentApi, EventSender, EventSubscriber, RequestReceipt, StreamRequest};
use threadline_core::{ChatError, LogRecord, RawEvent, Result, Subscription};

use crate::client::{Client, ClientError};

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ResumeRequest<'a> {
    thread_id: &'a str,
    values: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

fn route(agent_path: &str, rest: &str) -> String {
    format!("/{}/{}", agent_path.trim_matches('/'), rest)
}

// ============================================================================
// HttpAgentApi
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpAgentApi {
    client: Client,
}

impl HttpAgentApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn send_prompt(
        &self,
        agent_path: &str,
        prompt: &str,
        thread_id: Option<&str>,
    ) -> Result<RequestReceipt> {
        self.client
            .post(&route(agent_path, "process"), &ProcessRequest { prompt, thread_id })
            .await
            .map_err(|e| ChatError::request(e.to_string()))
    }

    async fn resume_with_input(
        &self,
        agent_path: &str,
        values: &Map<String, Value>,
        thread_id: &str,
    ) -> Result<RequestReceipt> {
        self.client
            .post(&route(agent_path, "resume"), &ResumeRequest { thread_id, values })
            .await
            .map_err(|e| ChatError::request(e.to_string()))
    }

    async fn fetch_thread_logs(&self, agent_path: &str, thread_id: &str) -> Result<Vec<LogRecord>> {
        let path = route(agent_path, &format!("threads/{thread_id}/logs"));
        match self.client.get::<ListResponse<LogRecord>>(&path).await {
            Ok(list) => Ok(list.data),
            // A thread with no history yet
            Err(ClientError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(ChatError::thread_logs(e.to_string())),
        }
    }

    /// The CLI keeps no cached thread list, so there is nothing to
    /// invalidate beyond noting the change.
    async fn notify_threads_changed(&self, agent_path: &str) -> Result<()> {
        tracing::debug!(agent_path = %agent_path, "Thread list changed");
        Ok(())
    }
}

// ============================================================================
// SseSubscriber
// ============================================================================

#[derive(Debug, Clone)]
pub struct SseSubscriber {
    client: Client,
}

impl SseSubscriber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl EventSubscriber for SseSubscriber {
    fn subscribe(&self, request: &StreamRequest, events: EventSender) -> Result<Subscription> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChatError::subscription(format!("no async runtime: {e}")))?;

        let client = self.client.clone();
        let request = request.clone();
        let reader = runtime.spawn(async move {
            if let Err(e) = read_events(&client, &request, events).await {
                tracing::warn!(request_id = %request.request_id, error = %e, "Event stream ended with error");
            }
        });

        Ok(Subscription::new(move || reader.abort()))
    }
}

/// Forward every event of the stream until it ends or the receiver is gone.
/// Dropping `events` on return tells the consumer the stream is closed.
async fn read_events(
    client: &Client,
    request: &StreamRequest,
    events: EventSender,
) -> std::result::Result<(), ClientError> {
    let response = client
        .stream(
            &route(&request.agent_path, "getevents"),
            &[("request_id", request.request_id.as_str()), ("stream", "true")],
        )
        .await?;
    tracing::debug!(request_id = %request.request_id, "Event stream opened");

    let mut stream = response.bytes_stream().eventsource();
    while let Some(item) = stream.next().await {
        let event = item.map_err(|e| ClientError::Stream(e.to_string()))?;
        if event.data.trim().is_empty() {
            continue;
        }
        match parse_event(&event.data) {
            Ok(raw) => {
                if events.send(raw).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, data = %event.data, "Skipping undecodable event");
            }
        }
    }
    Ok(())
}

/// Decode the data line of one server-sent event
pub fn parse_event(data: &str) -> serde_json::Result<RawEvent> {
    serde_json::from_str(data)
}
