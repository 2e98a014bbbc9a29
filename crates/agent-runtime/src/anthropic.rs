//! Anthropic LLM Provider
//!
//! Implementation of `LlmProvider` over the Anthropic Messages API with native
//! tool use. Tool calls map to `tool_use` blocks and tool results to
//! `tool_result` blocks inside user turns.

use std::time::Duration;

use agent_core::{
    error::{AgentError, ModelError, Result},
    message::{ContentBlock, Role, Turn},
    provider::{FinishReason, LlmProvider, ModelReply, ModelRequest, ProviderInfo, ReplyBlock, TokenUsage},
    tool::{ToolCall, ToolDescriptor},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Anthropic API version header value
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Clone)]
pub struct AnthropicConfig {
    api_key: String,

    /// API base URL
    pub base_url: String,

    /// Model used when a request does not name one
    pub model: String,

    /// HTTP request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            model: "claude-3-5-sonnet-20240620".into(),
            timeout: Duration::from_secs(90),
        }
    }

    /// Read `ANTHROPIC_API_KEY` (required), `ANTHROPIC_BASE_URL`,
    /// `ANTHROPIC_MODEL` and `ANTHROPIC_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            config.model = model;
        }
        if let Some(secs) = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    pub const fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.config.timeout)
        } else if e.is_connect() {
            ModelError::Unavailable(format!("connection failed: {e}"))
        } else {
            ModelError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Anthropic".into(),
            model: self.config.model.clone(),
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/v1/models"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .send()
            .await;
        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(e) => {
                warn!("Anthropic health check failed: {e}");
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        let body = to_wire_request(request, &self.config.model);
        debug!(model = %body.model, messages = body.messages.len(), tools = body.tools.len(), "sending messages request");

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidReply(e.to_string()))?;
        Ok(from_wire_response(wire))
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    model: String,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn to_wire_request(request: &ModelRequest, default_model: &str) -> WireRequest {
    let model = if request.options.model.is_empty() {
        default_model.to_string()
    } else {
        request.options.model.clone()
    };
    WireRequest {
        model,
        max_tokens: request.options.max_tokens,
        system: request.system.clone(),
        messages: request.turns.iter().map(to_wire_message).collect(),
        tools: request.tools.iter().map(to_wire_tool).collect(),
        temperature: request.options.temperature,
    }
}

fn to_wire_message(turn: &Turn) -> WireMessage {
    let role = match turn.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content = turn
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
            ContentBlock::ToolCall(call) => WireBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            },
            ContentBlock::ToolResult(result) => WireBlock::ToolResult {
                tool_use_id: result.call_id.clone(),
                content: result.payload.to_text(),
                is_error: result.is_error,
            },
        })
        .collect();
    WireMessage { role, content }
}

fn to_wire_tool(tool: &ToolDescriptor) -> WireTool {
    WireTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
    }
}

fn from_wire_response(wire: WireResponse) -> ModelReply {
    let content = wire
        .content
        .into_iter()
        .filter_map(|block| match block {
            WireBlock::Text { text } => Some(ReplyBlock::Text { text }),
            WireBlock::ToolUse { id, name, input } => Some(ReplyBlock::ToolCall(ToolCall::new(id, name, input))),
            WireBlock::ToolResult { .. } | WireBlock::Unsupported => None,
        })
        .collect();

    let finish_reason = match wire.stop_reason.as_deref() {
        Some("max_tokens") => Some(FinishReason::Length),
        Some("tool_use") => Some(FinishReason::ToolUse),
        Some(_) => Some(FinishReason::Stop),
        None => None,
    };

    ModelReply {
        content,
        model: wire.model,
        usage: wire.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens.saturating_add(u.output_tokens),
        }),
        finish_reason,
    }
}

fn status_error(status: StatusCode, body: &str) -> ModelError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited(message),
        s if s.is_server_error() => ModelError::Unavailable(format!("{s}: {message}")),
        s => ModelError::Http {
            status: s.as_u16(),
            message,
        },
    }
}
