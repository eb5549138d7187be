// Transcript command - print a thread's persisted conversation

use anyhow::{Context, Result};
use threadline_core::ChatSession;

use crate::output::{print_transcript, OutputFormat};

pub async fn run(chat: &ChatSession, output: OutputFormat, thread: String) -> Result<()> {
    chat.set_thread_id(Some(thread.clone()))
        .await
        .with_context(|| format!("Failed to load thread {thread}"))?;

    let messages = chat.messages().await;
    if output.is_text() {
        if messages.is_empty() {
            println!("No messages in thread {thread}");
        } else {
            print_transcript(&messages);
        }
        return Ok(());
    }

    output.print_value(&messages)
}
