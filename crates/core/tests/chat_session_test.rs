// Integration tests for ChatSession with in-memory collaborators
//
// Live streams are driven by hand through ChannelSubscriber feeds, so every
// test controls exactly which events arrive and when.
//
// Run with: cargo test -p threadline-core --test chat_session_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use threadline_core::memory::{ApiCall, ChannelSubscriber, EventFeed, InMemoryAgentApi};
use threadline_core::{
    normalize_logs, project_transcript, AgentEvent, ChatConfig, ChatError, ChatSession, EventKind,
    EventLog, LogRecord, Message, Payload, RawEvent, TurnCallbacks,
};

const AGENT: &str = "Reviewer";

fn setup() -> (ChatSession, InMemoryAgentApi, ChannelSubscriber) {
    let api = InMemoryAgentApi::new();
    let subscriber = ChannelSubscriber::new();
    let chat = ChatSession::new(
        ChatConfig::new("pr-review", AGENT),
        Arc::new(api.clone()),
        Arc::new(subscriber.clone()),
    );
    (chat, api, subscriber)
}

fn raw(kind: EventKind, payload: impl Into<Payload>) -> RawEvent {
    RawEvent::new(kind, AGENT, payload)
}

/// Wait for the `n`-th subscription (1-based) and return its feed
async fn wait_for_feed(subscriber: &ChannelSubscriber, n: usize) -> EventFeed {
    for _ in 0..1000 {
        if subscriber.subscription_count() >= n {
            if let Some(feed) = subscriber.feed(n - 1) {
                return feed;
            }
        }
        tokio::task::yield_now().await;
    }
    panic!("subscription {n} was never opened");
}

async fn wait_for_events(chat: &ChatSession, n: usize) {
    for _ in 0..1000 {
        if chat.events().await.len() >= n {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("log never reached {n} entries");
}

async fn wait_for_notifications(api: &InMemoryAgentApi, n: usize) {
    for _ in 0..1000 {
        if api.notify_count().await >= n {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("threads-changed notification {n} never arrived");
}

fn texts(log: &[AgentEvent]) -> Vec<(EventKind, String, String)> {
    log.iter()
        .map(|e| (e.kind.clone(), e.agent_name.clone(), e.text().into_owned()))
        .collect()
}

// ============================================================================
// Attended sends
// ============================================================================

#[tokio::test]
async fn test_attended_send_streams_into_single_message() {
    let (chat, api, subscriber) = setup();
    let fragments = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::new(AtomicUsize::new(0));

    let callbacks = {
        let fragments = Arc::clone(&fragments);
        let completions = Arc::clone(&completions);
        TurnCallbacks::new()
            .on_progress(move |fragment| fragments.lock().unwrap().push(fragment.to_string()))
            .on_complete(move || {
                completions.fetch_add(1, Ordering::SeqCst);
            })
    };

    let sender = chat.clone();
    let send = tokio::spawn(async move { sender.send_prompt("review #12", callbacks).await });

    let feed = wait_for_feed(&subscriber, 1).await;
    assert!(chat.is_sending().await);
    assert_eq!(feed.request().agent_name, AGENT);

    feed.send(raw(EventKind::PromptStarted, "review #12"));
    feed.send(raw(EventKind::ReasoningContent, "the diff is small"));
    feed.send(raw(EventKind::ChatOutput, "Loo"));
    feed.send(raw(EventKind::ChatOutput, "ks good"));
    feed.send(raw(EventKind::TurnEnd, ""));

    let outcome = send.await.unwrap().unwrap();

    assert_eq!(outcome.output, "Looks good");
    assert_eq!(chat.thread_id().await, Some(outcome.thread_id.clone()));
    assert!(!chat.is_sending().await);
    assert!(!chat.has_live_session().await);
    assert_eq!(feed.release_count(), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(*fragments.lock().unwrap(), vec!["Loo".to_string(), "ks good".to_string()]);
    assert_eq!(api.notify_count().await, 1);

    let events = chat.events().await;
    assert_eq!(events.len(), 4);
    assert_eq!(events[2].text(), "Looks good");

    assert_eq!(
        chat.messages().await,
        vec![
            Message::user("review #12"),
            Message::agent("Looks good", Some("the diff is small".into())),
        ]
    );
}

#[tokio::test]
async fn test_events_after_completion_are_ignored() {
    let (chat, _api, subscriber) = setup();

    let sender = chat.clone();
    let send = tokio::spawn(async move { sender.send_prompt("hi", TurnCallbacks::new()).await });

    let feed = wait_for_feed(&subscriber, 1).await;
    feed.send(raw(EventKind::ChatOutput, "done"));
    feed.send(raw(EventKind::TurnEnd, ""));
    // A second turn end must not settle or log anything
    feed.send(raw(EventKind::TurnEnd, ""));
    feed.send(raw(EventKind::ChatOutput, "late"));

    send.await.unwrap().unwrap();
    tokio::task::yield_now().await;

    let events = chat.events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].text(), "done");
}

#[tokio::test]
async fn test_second_send_reuses_thread() {
    let (chat, api, subscriber) = setup();

    for (n, prompt) in ["first", "second"].into_iter().enumerate() {
        let sender = chat.clone();
        let send = tokio::spawn(async move { sender.send_prompt(prompt, TurnCallbacks::new()).await });
        let feed = wait_for_feed(&subscriber, n + 1).await;
        feed.send(raw(EventKind::TurnEnd, ""));
        send.await.unwrap().unwrap();
    }

    let thread_id = chat.thread_id().await;
    let prompts: Vec<_> = api
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::SendPrompt { thread_id, .. } => Some(thread_id),
            _ => None,
        })
        .collect();
    assert_eq!(prompts, vec![None, thread_id]);
}

#[tokio::test]
async fn test_cancel_revokes_attended_send() {
    let (chat, _api, subscriber) = setup();

    let sender = chat.clone();
    let send = tokio::spawn(async move { sender.send_prompt("hi", TurnCallbacks::new()).await });
    let feed = wait_for_feed(&subscriber, 1).await;

    chat.cancel_stream().await;
    chat.cancel_stream().await;

    assert!(matches!(send.await.unwrap(), Err(ChatError::Revoked)));
    assert_eq!(feed.release_count(), 1);
    assert!(!chat.is_sending().await);
}

// ============================================================================
// Session exclusivity
// ============================================================================

#[tokio::test]
async fn test_overlapping_attended_sends_keep_sending_flag() {
    let (chat, _api, subscriber) = setup();

    let sender = chat.clone();
    let first = tokio::spawn(async move { sender.send_prompt("one", TurnCallbacks::new()).await });
    let first_feed = wait_for_feed(&subscriber, 1).await;

    let sender = chat.clone();
    let second = tokio::spawn(async move { sender.send_prompt("two", TurnCallbacks::new()).await });
    let second_feed = wait_for_feed(&subscriber, 2).await;

    assert!(matches!(first.await.unwrap(), Err(ChatError::Revoked)));
    assert_eq!(first_feed.release_count(), 1);
    assert!(chat.is_sending().await);
    assert!(chat.has_live_session().await);

    second_feed.send(raw(EventKind::ChatOutput, "two done"));
    second_feed.send(raw(EventKind::TurnEnd, ""));
    let outcome = second.await.unwrap().unwrap();

    assert_eq!(outcome.output, "two done");
    assert!(!chat.is_sending().await);
}

#[tokio::test]
async fn test_failed_send_keeps_flag_for_send_in_flight() {
    let (chat, api, subscriber) = setup();

    let sender = chat.clone();
    let first = tokio::spawn(async move { sender.send_prompt("one", TurnCallbacks::new()).await });
    let feed = wait_for_feed(&subscriber, 1).await;

    api.fail_requests("offline").await;
    let failed = chat.send_prompt("two", TurnCallbacks::new()).await;
    assert!(matches!(failed, Err(ChatError::Request(_))));
    assert!(chat.is_sending().await);

    feed.send(raw(EventKind::TurnEnd, ""));
    first.await.unwrap().unwrap();
    assert!(!chat.is_sending().await);
}

#[tokio::test]
async fn test_new_session_releases_background_session_first() {
    let (chat, _api, subscriber) = setup();

    chat.send_background_prompt("summarize").await.unwrap();
    let background = wait_for_feed(&subscriber, 1).await;
    background.send(raw(EventKind::ReasoningContent, "half way"));
    wait_for_events(&chat, 1).await;

    let sender = chat.clone();
    let send = tokio::spawn(async move { sender.send_prompt("hi", TurnCallbacks::new()).await });
    let attended = wait_for_feed(&subscriber, 2).await;

    assert_eq!(background.release_count(), 1);
    assert_eq!(attended.release_count(), 0);

    // The abandoned turn no longer reaches the log
    background.send(raw(EventKind::ChatOutput, "stale"));
    attended.send(raw(EventKind::ChatOutput, "fresh"));
    attended.send(raw(EventKind::TurnEnd, ""));
    send.await.unwrap().unwrap();

    let events = chat.events().await;
    assert!(events.iter().all(|e| e.text() != "stale"));
    assert_eq!(
        texts(&events),
        vec![
            (EventKind::ReasoningContent, AGENT.to_string(), "half way".to_string()),
            (EventKind::ChatOutput, AGENT.to_string(), "fresh".to_string()),
            (EventKind::TurnEnd, AGENT.to_string(), String::new()),
        ]
    );
    assert_eq!(background.release_count(), 1);
    assert_eq!(attended.release_count(), 1);
}

#[tokio::test]
async fn test_subscription_failure_leaves_log_untouched() {
    let (chat, _api, subscriber) = setup();
    subscriber.fail_next("stream unavailable");

    let result = chat.send_prompt("hi", TurnCallbacks::new()).await;

    assert!(matches!(result, Err(ChatError::Subscription(_))));
    assert!(chat.events().await.is_empty());
    assert!(!chat.is_sending().await);
    assert!(!chat.has_live_session().await);
}

#[tokio::test]
async fn test_request_failure_opens_no_subscription() {
    let (chat, api, subscriber) = setup();
    api.fail_requests("offline").await;

    let result = chat.send_prompt("hi", TurnCallbacks::new()).await;

    assert!(matches!(result, Err(ChatError::Request(_))));
    assert_eq!(subscriber.subscription_count(), 0);
    assert!(!chat.is_sending().await);

    assert!(matches!(
        chat.send_background_prompt("hi").await,
        Err(ChatError::Request(_))
    ));
}

// ============================================================================
// Background delivery
// ============================================================================

#[tokio::test]
async fn test_background_logs_only_reasoning_and_output() {
    let (chat, api, subscriber) = setup();

    let receipt = chat.send_background_prompt("summarize").await.unwrap();
    assert!(!chat.is_sending().await);
    assert_eq!(chat.thread_id().await, Some(receipt.thread_id));

    let feed = wait_for_feed(&subscriber, 1).await;
    feed.send(raw(EventKind::PromptStarted, "summarize"));
    feed.send(raw(EventKind::WaitForInput, json!({"repo": "?"})));
    feed.send(raw(EventKind::ReasoningContent, "thinking"));
    feed.send(raw(EventKind::ChatOutput, "summary"));
    feed.send(raw(EventKind::TurnEnd, ""));

    wait_for_notifications(&api, 1).await;

    let events = chat.events().await;
    assert_eq!(
        events.iter().map(|e| e.kind.clone()).collect::<Vec<_>>(),
        vec![EventKind::ReasoningContent, EventKind::ChatOutput]
    );
    assert!(events.iter().all(|e| e.is_background));
    assert!(chat.messages().await.is_empty());
    assert_eq!(feed.release_count(), 1);
    assert!(!chat.has_live_session().await);
}

// ============================================================================
// Threads and persisted logs
// ============================================================================

fn record(name: &str, event: Value, offset: i64) -> LogRecord {
    let base = chrono::DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    LogRecord::new(name, AGENT, event, base + Duration::seconds(offset))
}

#[tokio::test]
async fn test_set_thread_id_loads_and_clears() {
    let (chat, api, _subscriber) = setup();
    api.seed_thread_logs(
        "t1",
        vec![
            record("prompt_started", json!({"content": "review #12"}), 0),
            record("chat_output", json!({"content": "Loo"}), 1),
            record("chat_output", json!({"content": "ks good"}), 2),
            record("turn_end", json!({}), 3),
        ],
    )
    .await;

    chat.set_thread_id(Some("t1".into())).await.unwrap();
    assert!(!chat.is_loading_thread_logs().await);
    assert_eq!(chat.events().await.len(), 3);
    assert_eq!(
        chat.messages().await,
        vec![Message::user("review #12"), Message::agent("Looks good", None)]
    );

    // Same thread again does not refetch
    chat.set_thread_id(Some("t1".into())).await.unwrap();
    let fetches = api
        .calls()
        .await
        .iter()
        .filter(|c| matches!(c, ApiCall::FetchThreadLogs { .. }))
        .count();
    assert_eq!(fetches, 1);

    chat.set_thread_id(None).await.unwrap();
    assert!(chat.events().await.is_empty());
    assert_eq!(chat.thread_id().await, None);
}

#[tokio::test]
async fn test_thread_log_failure_keeps_log() {
    let (chat, api, _subscriber) = setup();
    api.seed_thread_logs("t1", vec![record("prompt_started", json!("hi"), 0)])
        .await;
    chat.set_thread_id(Some("t1".into())).await.unwrap();

    api.fail_thread_logs("down").await;
    let result = chat.refresh_thread_logs().await;

    assert!(matches!(result, Err(ChatError::ThreadLogs(_))));
    assert_eq!(chat.events().await.len(), 1);
    assert!(!chat.is_loading_thread_logs().await);
}

#[tokio::test]
async fn test_resume_answers_input_request() {
    let (chat, api, subscriber) = setup();
    api.seed_thread_logs(
        "t1",
        vec![
            record("prompt_started", json!({"content": "review"}), 0),
            record(
                "wait_for_input",
                json!({"payload": {"request_keys": {"repo": "Which repo?", "pr": "Which PR?"}}}),
                1,
            ),
        ],
    )
    .await;
    chat.set_thread_id(Some("t1".into())).await.unwrap();

    match &chat.messages().await[1] {
        Message::InputRequest { form_disabled, .. } => assert!(!form_disabled),
        other => panic!("expected input request, got {other:?}"),
    }

    let mut values = Map::new();
    values.insert("repo".into(), json!("threadline"));
    values.insert("pr".into(), json!("12"));

    let sender = chat.clone();
    let answer = values.clone();
    let resume = tokio::spawn(async move { sender.resume_with_input(answer, TurnCallbacks::new()).await });

    let feed = wait_for_feed(&subscriber, 1).await;
    assert_eq!(feed.request().thread_id, "t1");
    let submitted = serde_json::to_string(&values).unwrap();
    feed.send(raw(EventKind::ResumeWithInput, json!({"content": submitted})));
    feed.send(raw(EventKind::ChatOutput, "On it"));
    feed.send(raw(EventKind::TurnEnd, ""));
    resume.await.unwrap().unwrap();

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 4);
    match &messages[1] {
        Message::InputRequest {
            input_keys,
            resume_values,
            form_disabled,
        } => {
            assert!(form_disabled);
            assert_eq!(input_keys.keys().collect::<Vec<_>>(), vec!["repo", "pr"]);
            assert_eq!(resume_values.as_ref().map(|p| p.text().into_owned()), Some(submitted));
        }
        other => panic!("expected input request, got {other:?}"),
    }
    assert_eq!(messages[2], Message::user("threadline\n12"));
    assert_eq!(messages[3], Message::agent("On it", None));

    assert!(api.calls().await.contains(&ApiCall::ResumeWithInput {
        agent_path: "pr-review".into(),
        values,
        thread_id: "t1".into(),
    }));
}

// ============================================================================
// Live and persisted paths agree
// ============================================================================

#[tokio::test]
async fn test_streamed_log_matches_normalized_history() {
    let (chat, _api, subscriber) = setup();
    let stream = vec![
        (EventKind::PromptStarted, "review"),
        (EventKind::ReasoningContent, "small diff"),
        (EventKind::ChatOutput, "Lo"),
        (EventKind::ChatOutput, "oks "),
        (EventKind::ChatOutput, "good"),
        (EventKind::WaitForInput, ""),
        (EventKind::ChatOutput, "Thanks"),
        (EventKind::TurnEnd, ""),
    ];

    let sender = chat.clone();
    let send = tokio::spawn(async move { sender.send_prompt("review", TurnCallbacks::new()).await });
    let feed = wait_for_feed(&subscriber, 1).await;
    for (kind, text) in &stream {
        feed.send(raw(kind.clone(), *text));
    }
    send.await.unwrap().unwrap();

    let records: Vec<LogRecord> = stream
        .iter()
        .enumerate()
        .map(|(i, (kind, text))| record(kind.as_str(), json!({"content": text}), i as i64))
        .collect();
    let history = normalize_logs(&records);

    assert_eq!(texts(&chat.events().await), texts(history.events()));
    assert_eq!(
        chat.messages().await,
        project_transcript(&history, AGENT)
    );
}

#[test]
fn test_reasoning_projection_from_history() {
    let log: EventLog = vec![
        AgentEvent::new(EventKind::PromptStarted, AGENT, "review"),
        AgentEvent::new(EventKind::ReasoningContent, AGENT, "looked at tests"),
        AgentEvent::new(EventKind::ChatOutput, AGENT, "hi"),
    ]
    .into_iter()
    .collect();

    let messages = project_transcript(&log, AGENT);

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "hi");
    assert_eq!(messages[1].reasoning(), Some("looked at tests"));
}
