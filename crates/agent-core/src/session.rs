//! Session Management
//!
//! A session binds one conversation to one tool-provider subprocess and its
//! channel. Nothing is shared between sessions; each is disposable on its own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Conversation, Turn};
use crate::protocol::Implementation;
use crate::proxy::ToolProviderProxy;
use crate::tool::ToolRegistry;
use crate::transport::{CommandSpec, StdioTransport, Transport};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How to launch and talk to the tool provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Tool-provider command line
    pub command: CommandSpec,

    /// Deadline for one proxy round trip
    pub request_timeout: Duration,

    /// Time the provider gets to exit on its own before it is killed
    pub close_grace: Duration,

    /// Identity sent in the handshake
    pub client_info: Implementation,
}

impl SessionConfig {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            request_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(2),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    #[must_use]
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}

/// One orchestrated conversation and the tool provider serving it
pub struct Session {
    id: SessionId,
    proxy: ToolProviderProxy,
    conversation: Conversation,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed: bool,
}

impl Session {
    /// Spawn the provider, perform the handshake and cache its catalog
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let transport = StdioTransport::spawn(&config.command, config.close_grace)?;
        Self::with_transport(Box::new(transport), config).await
    }

    /// Start a session over an existing channel.
    ///
    /// The channel is closed again if the handshake or discovery fails.
    pub async fn with_transport(transport: Box<dyn Transport>, config: &SessionConfig) -> Result<Self> {
        let now = Utc::now();
        let mut session = Self {
            id: SessionId::new(),
            proxy: ToolProviderProxy::new(transport, config.client_info.clone(), config.request_timeout),
            conversation: Conversation::new(),
            created_at: now,
            updated_at: now,
            closed: false,
        };

        if let Err(e) = session.handshake().await {
            warn!(session_id = %session.id, error = %e, "session setup failed");
            session.close().await;
            return Err(e);
        }

        info!(
            session_id = %session.id,
            tools = session.proxy.registry().len(),
            "session opened"
        );
        Ok(session)
    }

    async fn handshake(&self) -> Result<()> {
        self.proxy.initialize().await?;
        self.proxy.discover().await?;
        Ok(())
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn proxy(&self) -> &ToolProviderProxy {
        &self.proxy
    }

    pub const fn registry(&self) -> &ToolRegistry {
        self.proxy.registry()
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append the turns of a finished run
    pub(crate) fn commit(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.conversation.extend(turns);
        self.updated_at = Utc::now();
    }

    /// Terminate the provider. Later calls do nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.updated_at = Utc::now();

        if let Err(e) = self.proxy.close().await {
            warn!(session_id = %self.id, error = %e, "tool provider did not shut down cleanly");
        }
        info!(session_id = %self.id, turns = self.conversation.len(), "session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("turns", &self.conversation.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
