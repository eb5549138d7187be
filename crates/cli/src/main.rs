// Threadline CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: The CLI only supplies transports; every conversation rule lives in threadline-core.

mod client;
mod commands;
mod output;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use threadline_core::telemetry::{init_telemetry, TelemetryConfig};
use threadline_core::{ChatConfig, ChatSession};

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Threadline CLI - Chat with an agent and inspect its threads")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(
        long,
        env = "THREADLINE_API_URL",
        default_value = "http://localhost:8000"
    )]
    pub api_url: String,

    /// Route prefix of the agent
    #[arg(long, env = "THREADLINE_AGENT_PATH")]
    pub agent_path: String,

    /// Agent name events are attributed to
    #[arg(long, env = "THREADLINE_AGENT_NAME")]
    pub agent_name: String,

    /// Timeout for request/response calls, in seconds
    #[arg(long, env = "THREADLINE_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout: u64,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a message and stream the response
    Chat {
        /// Message text to send
        message: String,

        /// Continue an existing thread
        #[arg(long, short)]
        thread: Option<String>,

        /// Send without waiting for the response
        #[arg(long)]
        background: bool,
    },

    /// Answer a pending input request
    Resume {
        /// Thread waiting for input
        #[arg(long, short)]
        thread: String,

        /// Answers as key=value pairs
        #[arg(required = true, value_parser = commands::resume::parse_key_value)]
        values: Vec<(String, String)>,
    },

    /// Print the transcript of a thread
    Transcript {
        /// Thread to load
        #[arg(long, short)]
        thread: String,
    },
}

impl Cli {
    fn chat_config(&self) -> anyhow::Result<ChatConfig> {
        let config = ChatConfig::new(&self.agent_path, &self.agent_name)
            .with_api_url(&self.api_url)
            .with_request_timeout(Duration::from_secs(self.request_timeout));
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(TelemetryConfig::from_env());

    let cli = Cli::parse();
    let config = cli.chat_config()?;
    let client = client::Client::new(&config.api_url, config.request_timeout);
    let chat = ChatSession::new(
        config,
        Arc::new(transport::HttpAgentApi::new(client.clone())),
        Arc::new(transport::SseSubscriber::new(client)),
    );
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Chat {
            message,
            thread,
            background,
        } => commands::chat::run(&chat, output_format, cli.quiet, message, thread, background).await,
        Commands::Resume { thread, values } => {
            commands::resume::run(&chat, output_format, cli.quiet, thread, values).await
        }
        Commands::Transcript { thread } => {
            commands::transcript::run(&chat, output_format, thread).await
        }
    }
}
