//! Tool Provider Proxy
//!
//! Typed request/response operations over a [`Transport`]: handshake, catalog
//! discovery, tool invocation and resource reads. The wire protocol is strictly
//! synchronous, so the channel sits behind an async mutex and exactly one
//! request is in flight at a time.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION, ReadResourceParams, ReadResourceResult, RequestId, ResourceContents,
    ResourceInfo, ResourcesListResult, ToolsListResult, codes, methods,
};
use crate::resource::ResourceAddress;
use crate::tool::{ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
use crate::transport::Transport;

/// Upper bound on `tools/list` pages followed during discovery
const MAX_CATALOG_PAGES: usize = 64;

pub struct ToolProviderProxy {
    channel: Mutex<Box<dyn Transport>>,
    registry: ToolRegistry,
    client_info: Implementation,
    server_info: OnceLock<InitializeResult>,
    next_id: AtomicI64,
    in_flight: AtomicBool,
    broken: AtomicBool,
    request_timeout: Duration,
}

impl ToolProviderProxy {
    pub fn new(transport: Box<dyn Transport>, client_info: Implementation, request_timeout: Duration) -> Self {
        Self {
            channel: Mutex::new(transport),
            registry: ToolRegistry::new(),
            client_info,
            server_info: OnceLock::new(),
            next_id: AtomicI64::new(1),
            in_flight: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            request_timeout,
        }
    }

    /// Perform the one-time handshake
    pub async fn initialize(&self) -> Result<&InitializeResult> {
        if let Some(info) = self.server_info.get() {
            return Ok(info);
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({}),
            client_info: self.client_info.clone(),
        };
        let reply = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await
            .map_err(|e| match e {
                AgentError::Protocol(_) => e,
                other => AgentError::Protocol(format!("no handshake reply: {other}")),
            })?
            .map_err(|e| AgentError::Protocol(format!("handshake rejected: {e}")))?;

        let result: InitializeResult = serde_json::from_value(reply)
            .map_err(|e| AgentError::Protocol(format!("malformed handshake reply: {e}")))?;

        self.notify(methods::INITIALIZED, None).await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "tool provider initialized"
        );
        Ok(self.server_info.get_or_init(|| result))
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.get().is_some()
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.get().map(|r| &r.server_info)
    }

    /// Query the peer's tool catalog
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolsListResult = self.call_decoded(methods::TOOLS_LIST, params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    debug!(count = tools.len(), "listed tools");
                    return Ok(tools);
                }
            }
        }
        Err(AgentError::Protocol(format!(
            "tool catalog did not end within {MAX_CATALOG_PAGES} pages"
        )))
    }

    /// List tools and cache them in the registry
    pub async fn discover(&self) -> Result<&ToolRegistry> {
        if !self.registry.is_populated() {
            let tools = self.list_tools().await?;
            self.registry.populate(tools)?;
            info!(tools = ?self.registry.names(), "tool catalog cached");
        }
        Ok(&self.registry)
    }

    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke a tool.
    ///
    /// Arguments are checked against the cached schema before anything is
    /// written to the channel. A JSON-RPC error reply becomes
    /// `ToolExecution`; a broken channel becomes `Session`.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        self.ensure_initialized()?;
        self.registry.validate(&call.name, &call.arguments)?;

        debug!(tool = %call.name, call_id = %call.id, "invoking tool");
        let params = CallToolParams {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };

        let reply = match self.request(methods::TOOLS_CALL, Some(serde_json::to_value(params)?)).await {
            Ok(reply) => reply,
            Err(AgentError::Transport(e)) => {
                return Err(AgentError::Session(format!(
                    "channel broke while invoking '{}': {e}",
                    call.name
                )));
            }
            Err(other) => return Err(other),
        };

        match reply {
            Ok(value) => {
                let result: CallToolResult = serde_json::from_value(value).map_err(|e| {
                    self.mark_broken();
                    AgentError::Protocol(format!("malformed tools/call reply: {e}"))
                })?;
                Ok(result.into_tool_result(call.id.clone()))
            }
            Err(e) => Err(AgentError::ToolExecution(format!("{}: {}", call.name, e.message))),
        }
    }

    /// List the resources the peer serves
    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        self.ensure_initialized()?;
        let result: ResourcesListResult = self.call_decoded(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    /// Resolve a typed address into a `resources/read` query
    pub async fn read_resource(&self, address: &ResourceAddress) -> Result<ResourceContents> {
        self.ensure_initialized()?;
        let uri = address.uri();
        let params = serde_json::to_value(ReadResourceParams { uri: uri.clone() })?;
        let value = self
            .request(methods::RESOURCES_READ, Some(params))
            .await?
            .map_err(|e| AgentError::ToolExecution(format!("{uri}: {}", e.message)))?;
        let result: ReadResourceResult = serde_json::from_value(value)
            .map_err(|e| AgentError::Protocol(format!("malformed resources/read reply: {e}")))?;
        result
            .contents
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Protocol(format!("resource {uri} came back empty")))
    }

    /// Close the channel and terminate the peer
    pub async fn close(&self) -> Result<()> {
        self.mark_broken();
        let mut channel = self.channel.lock().await;
        channel.close().await?;
        Ok(())
    }

    pub fn is_usable(&self) -> bool {
        !self.broken.load(Ordering::SeqCst)
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AgentError::Protocol("handshake has not completed".into()))
        }
    }

    async fn call_decoded<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let value = self
            .request(method, params)
            .await?
            .map_err(|e| AgentError::Protocol(format!("{method} failed: {e}")))?;
        serde_json::from_value(value).map_err(|e| AgentError::Protocol(format!("malformed {method} reply: {e}")))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut channel = self.channel.lock().await;
        if !self.is_usable() {
            return Err(AgentError::Session("tool provider channel is no longer usable".into()));
        }
        let message: JsonRpcMessage = JsonRpcNotification::new(method, params).into();
        channel.send(&message).await.map_err(|e| {
            self.mark_broken();
            AgentError::Transport(e)
        })
    }

    /// One request/response exchange. The outer `Result` is the channel's
    /// health; the inner one is the peer's answer.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<std::result::Result<Value, JsonRpcError>> {
        let mut channel = self.channel.lock().await;

        if !self.is_usable() {
            return Err(AgentError::Session("tool provider channel is no longer usable".into()));
        }
        // Still set means the previous exchange was dropped mid-flight and its
        // reply may be sitting in the pipe.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.mark_broken();
            return Err(AgentError::Session("a previous request was interrupted".into()));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = JsonRpcRequest::new(id.clone(), method, params);

        let exchange = exchange(channel.as_mut(), request);
        let outcome = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.mark_broken();
                return Err(AgentError::Session(format!(
                    "{method} got no reply within {:?}",
                    self.request_timeout
                )));
            }
        };

        match outcome {
            Ok(response) => {
                self.in_flight.store(false, Ordering::SeqCst);
                match (response.result, response.error) {
                    (_, Some(error)) => {
                        debug!(%method, %id, %error, "peer returned an error");
                        Ok(Err(error))
                    }
                    (Some(result), None) => Ok(Ok(result)),
                    (None, None) => Ok(Ok(Value::Null)),
                }
            }
            Err(e) => {
                self.mark_broken();
                warn!(%method, %id, error = %e, "tool provider exchange failed");
                Err(e)
            }
        }
    }
}

async fn exchange(channel: &mut dyn Transport, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
    let id = request.id.clone();
    channel.send(&request.into()).await?;

    loop {
        match channel.receive().await? {
            JsonRpcMessage::Response(response) if response.id == id => return Ok(response),
            JsonRpcMessage::Response(response) => {
                return Err(AgentError::Protocol(format!(
                    "expected reply to request {id}, got reply to {}",
                    response.id
                )));
            }
            JsonRpcMessage::Notification(note) => {
                debug!(method = %note.method, "tool provider notification");
            }
            JsonRpcMessage::Request(peer) => {
                let answer = if peer.method == methods::PING {
                    JsonRpcResponse::success(peer.id, serde_json::json!({}))
                } else {
                    warn!(method = %peer.method, "unsupported request from tool provider");
                    JsonRpcResponse::error(peer.id, codes::METHOD_NOT_FOUND, "method not supported by client")
                };
                channel.send(&answer.into()).await?;
            }
        }
    }
}
