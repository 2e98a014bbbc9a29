//! LLM Provider Strategy Pattern
//!
//! The model service boundary: one request/response operation that takes the
//! system instructions, the ordered conversation, the tool catalog and an
//! output-size bound, and returns ordered content blocks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{LlmProvider, ModelRequest};
//!
//! let provider = AnthropicProvider::from_env()?;
//! let reply = provider.complete(&request).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ContentBlock, Turn};
use crate::tool::{ToolCall, ToolDescriptor};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "claude-3-5-sonnet-20240620")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_max_tokens() -> u32 {
    1000
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20240620".into(),
            temperature: None,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Everything the model sees for one invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRequest {
    /// System instructions
    pub system: Option<String>,

    /// Ordered conversation turns
    pub turns: Vec<Turn>,

    /// Tool catalog offered this turn
    pub tools: Vec<ToolDescriptor>,

    pub options: GenerationOptions,
}

/// One block of a model reply
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBlock {
    Text { text: String },
    ToolCall(ToolCall),
}

impl ReplyBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCall(ToolCall::new(id, name, arguments))
    }
}

impl From<ReplyBlock> for ContentBlock {
    fn from(block: ReplyBlock) -> Self {
        match block {
            ReplyBlock::Text { text } => Self::Text { text },
            ReplyBlock::ToolCall(call) => Self::ToolCall(call),
        }
    }
}

/// Response from one model invocation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelReply {
    /// Ordered content blocks
    pub content: Vec<ReplyBlock>,

    /// Model that generated this response
    #[serde(default)]
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl ModelReply {
    pub fn new(content: Vec<ReplyBlock>) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    /// A reply holding a single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ReplyBlock::text(text)])
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|b| matches!(b, ReplyBlock::ToolCall(_)))
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "Anthropic")
    pub name: String,

    /// Default model
    pub model: String,

    /// Whether tool/function calling is supported
    pub supports_tools: bool,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider information and capabilities
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Submit one request and wait for the reply
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply>;
}
