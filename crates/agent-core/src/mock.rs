//! Scripted test doubles
//!
//! `ScriptedProvider` replays canned model replies; `ScriptedTransport` plays
//! the tool provider in memory and exposes a [`TransportTap`] that records
//! every frame written and every `close()` call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{ModelError, Result, TransportError};
use crate::protocol::{
    CallToolParams, CallToolResult, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION, codes, methods,
};
use crate::provider::{LlmProvider, ModelReply, ModelRequest, ProviderInfo};
use crate::tool::ToolDescriptor;
use crate::transport::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Model service
// ============================================================================

/// Model service that answers from a script
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ModelReply>>,
    repeat: Option<ModelReply>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Answer with `replies` in order, then fail as unavailable
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer every request with the same reply
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new([])
        }
    }

    /// Sleep before each reply
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Scripted".into(),
            model: "scripted".into(),
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        lock(&self.requests).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.replies).pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| ModelError::Unavailable("script exhausted".into()).into())
    }
}

// ============================================================================
// Tool provider
// ============================================================================

/// How the scripted peer answers one request
pub enum ScriptedReply {
    /// Queue this frame for the next `receive`
    Respond(JsonRpcMessage),
    /// The peer exits: further sends fail and receives hit end of stream
    Hangup,
    /// The peer never answers
    Silence,
}

type Responder = Box<dyn FnMut(&JsonRpcRequest) -> ScriptedReply + Send>;

/// Shared view into a [`ScriptedTransport`]
#[derive(Clone, Default)]
pub struct TransportTap {
    sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
    close_calls: Arc<AtomicUsize>,
    terminations: Arc<AtomicUsize>,
}

impl TransportTap {
    /// Frames successfully written to the peer
    pub fn sent(&self) -> Vec<JsonRpcMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    /// Number of `tools/call` requests written
    pub fn tool_calls_sent(&self) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|m| m.method() == Some(methods::TOOLS_CALL))
            .count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Times the peer was actually terminated
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

/// In-memory tool provider
pub struct ScriptedTransport {
    responder: Responder,
    inbox: VecDeque<JsonRpcMessage>,
    hung_up: bool,
    closed: bool,
    tap: TransportTap,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(&JsonRpcRequest) -> ScriptedReply + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            inbox: VecDeque::new(),
            hung_up: false,
            closed: false,
            tap: TransportTap::default(),
        }
    }

    /// A well-behaved provider serving `tools`, answering `tools/call` with `handler`
    pub fn tool_server(
        tools: Vec<ToolDescriptor>,
        mut handler: impl FnMut(&str, &Value) -> CallToolResult + Send + 'static,
    ) -> Self {
        Self::new(move |request| {
            if request.method != methods::TOOLS_CALL {
                return Self::default_reply(request, &tools);
            }
            let params: Option<CallToolParams> = request
                .params
                .clone()
                .and_then(|p| serde_json::from_value(p).ok());
            let response = match params {
                Some(params) => {
                    let result = handler(&params.name, &params.arguments);
                    JsonRpcResponse::success(request.id.clone(), serde_json::to_value(result).unwrap_or_default())
                }
                None => JsonRpcResponse::error(request.id.clone(), codes::INVALID_PARAMS, "bad tools/call params"),
            };
            ScriptedReply::Respond(response.into())
        })
    }

    /// Standard answers for the handshake, catalog and ping
    pub fn default_reply(request: &JsonRpcRequest, tools: &[ToolDescriptor]) -> ScriptedReply {
        let id = request.id.clone();
        let response = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "0.0.0"}
                }),
            ),
            methods::TOOLS_LIST => JsonRpcResponse::success(id, json!({ "tools": tools })),
            methods::PING => JsonRpcResponse::success(id, json!({})),
            other => JsonRpcResponse::error(id, codes::METHOD_NOT_FOUND, format!("unknown method {other}")),
        };
        ScriptedReply::Respond(response.into())
    }

    pub fn tap(&self) -> TransportTap {
        self.tap.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, message: &JsonRpcMessage) -> std::result::Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.hung_up {
            return Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        lock(&self.tap.sent).push(message.clone());

        if let JsonRpcMessage::Request(request) = message {
            match (self.responder)(request) {
                ScriptedReply::Respond(reply) => self.inbox.push_back(reply),
                ScriptedReply::Hangup => self.hung_up = true,
                ScriptedReply::Silence => {}
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> std::result::Result<JsonRpcMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if let Some(message) = self.inbox.pop_front() {
            return Ok(message);
        }
        if self.hung_up {
            return Err(TransportError::Eof);
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> std::result::Result<(), TransportError> {
        self.tap.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed {
            self.closed = true;
            self.tap.terminations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
