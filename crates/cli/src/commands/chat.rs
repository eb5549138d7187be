// Chat command - send a message and stream the response

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use threadline_core::{ChatSession, Message, SessionOutcome, TurnCallbacks};

use crate::output::{print_field, OutputFormat};

/// Structured result of one turn for json/yaml output
#[derive(Debug, Serialize)]
struct TurnReport<'a> {
    thread_id: &'a str,
    request_id: &'a str,
    output: &'a str,
    messages: Vec<Message>,
}

/// Callbacks echoing fragments to stdout when streaming text output
pub fn streaming_callbacks(output: OutputFormat, quiet: bool) -> TurnCallbacks {
    if quiet || !output.is_text() {
        return TurnCallbacks::new();
    }
    print!("Agent: ");
    TurnCallbacks::new().on_progress(|fragment| {
        print!("{fragment}");
        let _ = std::io::stdout().flush();
    })
}

/// Print the end of a turn
pub async fn report_turn(
    chat: &ChatSession,
    output: OutputFormat,
    quiet: bool,
    outcome: &SessionOutcome,
) -> Result<()> {
    if output.is_text() {
        if quiet {
            println!("{}", outcome.output);
        } else {
            println!("\n");
            print_field("Thread", &outcome.thread_id);
        }
        return Ok(());
    }

    output.print_value(&TurnReport {
        thread_id: &outcome.thread_id,
        request_id: &outcome.request_id,
        output: &outcome.output,
        messages: chat.messages().await,
    })
}

pub async fn run(
    chat: &ChatSession,
    output: OutputFormat,
    quiet: bool,
    message: String,
    thread: Option<String>,
    background: bool,
) -> Result<()> {
    if thread.is_some() {
        chat.set_thread_id(thread)
            .await
            .context("Failed to load thread")?;
    }

    if !quiet && output.is_text() {
        println!("You: {}\n", message);
    }

    if background {
        let receipt = chat
            .send_background_prompt(&message)
            .await
            .context("Failed to send message")?;
        if output.is_text() {
            print_field("Request", &receipt.request_id);
            print_field("Thread", &receipt.thread_id);
        } else {
            output.print_value(&receipt)?;
        }
        return Ok(());
    }

    let callbacks = streaming_callbacks(output, quiet);
    let outcome = chat
        .send_prompt(&message, callbacks)
        .await
        .context("Chat turn failed")?;

    report_turn(chat, output, quiet, &outcome).await
}
