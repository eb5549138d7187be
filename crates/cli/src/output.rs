// Output formatting for CLI

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use threadline_core::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            "yaml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            OutputFormat::Yaml => {
                println!("{}", serde_yaml::to_string(value)?);
            }
            OutputFormat::Text => {
                // Text format is handled by each command
            }
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Print a transcript for text output
pub fn print_transcript(messages: &[Message]) {
    for message in messages {
        println!("{}", render_message(message));
    }
}

/// Render one message as text lines
pub fn render_message(message: &Message) -> String {
    match message {
        Message::User { content } => format!("You: {content}"),
        Message::Agent { content, reasoning } => {
            let mut out = String::new();
            if let Some(reasoning) = reasoning {
                out.push_str(&format!("  (reasoning) {reasoning}\n"));
            }
            if content.is_empty() {
                out.push_str("Agent: ...");
            } else {
                out.push_str(&format!("Agent: {content}"));
            }
            out
        }
        Message::InputRequest {
            input_keys,
            form_disabled,
            ..
        } => {
            let status = if *form_disabled { "answered" } else { "waiting" };
            let mut out = format!("Agent requests input ({status}):");
            for (key, prompt) in input_keys {
                match prompt {
                    Value::String(prompt) => out.push_str(&format!("\n  {key}: {prompt}")),
                    _ => out.push_str(&format!("\n  {key}")),
                }
            }
            out
        }
    }
}
