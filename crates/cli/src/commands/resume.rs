// Resume command - answer a pending input request

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use threadline_core::ChatSession;

use super::chat::{report_turn, streaming_callbacks};
use crate::output::OutputFormat;

/// Parse a `key=value` argument
pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got `{s}`")),
    }
}

/// Collect answers in the order they were given
pub fn into_values(pairs: Vec<(String, String)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

pub async fn run(
    chat: &ChatSession,
    output: OutputFormat,
    quiet: bool,
    thread: String,
    values: Vec<(String, String)>,
) -> Result<()> {
    chat.set_thread_id(Some(thread))
        .await
        .context("Failed to load thread")?;

    let callbacks = streaming_callbacks(output, quiet);
    let outcome = chat
        .resume_with_input(into_values(values), callbacks)
        .await
        .context("Resume failed")?;

    report_turn(chat, output, quiet, &outcome).await
}
