//! # agent-runtime
//!
//! Model service providers for the orchestrator.
//!
//! ## Providers
//!
//! - **Anthropic** (default): Claude models through the Messages API with native tool use
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::anthropic::AnthropicProvider;
//!
//! let provider = AnthropicProvider::from_env()?;
//! let orchestrator = Orchestrator::builder()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, ModelReply, ModelRequest, Orchestrator, Result};
