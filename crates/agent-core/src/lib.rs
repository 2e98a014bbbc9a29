//! # agent-core
//!
//! Tool-calling orchestration: a model service on one side, a tool-provider
//! subprocess on the other, and a turn loop in between.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                           │
//! │  ┌─────────────┐   ┌──────────────────────────────────────────┐  │
//! │  │ LlmProvider │   │                 Session                  │  │
//! │  │ (Strategy)  │   │  Conversation   ToolProviderProxy        │  │
//! │  └─────────────┘   │                 ├─ ToolRegistry          │  │
//! │                    │                 └─ Transport ──► child   │  │
//! │                    └──────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One session owns one subprocess and one channel. The `LlmProvider` trait
//! keeps the loop independent of any particular model service.

pub mod error;
pub mod message;
pub mod mock;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod reasoning;
pub mod resource;
pub mod schema;
pub mod session;
pub mod tool;
pub mod transport;

pub use error::{AgentError, ErrorKind, ModelError, Result, TransportError};
pub use message::{ContentBlock, Conversation, Role, Turn};
pub use provider::{GenerationOptions, LlmProvider, ModelReply, ModelRequest, ReplyBlock};
pub use proxy::ToolProviderProxy;
pub use reasoning::{Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunOutcome, RunStatus, ToolExecution};
pub use resource::{ResourceAddress, ResourceKey, ResourceKind};
pub use session::{Session, SessionConfig, SessionId};
pub use tool::{ToolCall, ToolDescriptor, ToolPayload, ToolRegistry, ToolResult};
pub use transport::{CommandSpec, StdioTransport, Transport};
pub use tokio_util::sync::CancellationToken;
