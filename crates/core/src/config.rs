// Chat configuration
//
// ChatConfig names the agent a ChatSession talks to. It can be built directly
// or loaded from THREADLINE_* environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

pub const ENV_API_URL: &str = "THREADLINE_API_URL";
pub const ENV_AGENT_PATH: &str = "THREADLINE_AGENT_PATH";
pub const ENV_AGENT_NAME: &str = "THREADLINE_AGENT_NAME";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "THREADLINE_REQUEST_TIMEOUT_SECS";

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Configuration for a chat session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Route prefix of the agent (e.g. "pr-review")
    pub agent_path: String,

    /// Agent name used to attribute events (e.g. "Reviewer")
    pub agent_name: String,

    /// Base URL of the agent API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Timeout for request/response calls. Live streams are not bounded.
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            agent_path: String::new(),
            agent_name: String::new(),
            api_url: default_api_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ChatConfig {
    pub fn new(agent_path: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_path: agent_path.into(),
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }

    /// Load from THREADLINE_* variables. Agent path and name are required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ChatError::config(format!("{key} is not set")))
        };

        let mut config = Self::new(required(ENV_AGENT_PATH)?, required(ENV_AGENT_NAME)?);

        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            config.api_url = url;
        }

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ChatError::config(format!("{ENV_REQUEST_TIMEOUT_SECS} must be a number of seconds, got {raw:?}"))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_path.trim().is_empty() {
            return Err(ChatError::config("agent path must not be empty"));
        }
        if self.agent_name.trim().is_empty() {
            return Err(ChatError::config("agent name must not be empty"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ChatError::config(format!(
                "API URL must start with http:// or https://, got {}",
                self.api_url
            )));
        }
        Ok(())
    }

    /// URL for a route under this agent, e.g. `endpoint("process")`
    pub fn endpoint(&self, route: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.agent_path.trim_matches('/'),
            route.trim_start_matches('/')
        )
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
