//! Stdio JSON-RPC server
//!
//! Reads one request per line, answers on the writer, and exits when the
//! reader hits end of stream. Stdout carries only protocol frames; all logging
//! goes to stderr.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use agent_core::protocol::{
    CallToolParams, CallToolResult, ContentItem, Implementation, InitializeResult, JsonRpcError,
    JSONRPC_VERSION, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ReadResourceParams,
    ReadResourceResult, ResourceContents, ResourceInfo, ResourcesListResult, ToolsListResult, codes,
    methods,
};
use agent_core::resource::{ResourceAddress, ResourceKey};
use agent_core::schema;

use crate::error::{ClinicError, Result};
use crate::repository::PatientRepository;
use crate::store::Store;
use crate::svckit::ToolKit;

const JSON_MIME: &str = "application/json";

/// Parse errors have no request to correlate with, so they carry a null id
fn parse_error_frame(detail: &str) -> serde_json::Result<String> {
    let error = JsonRpcError {
        code: codes::PARSE_ERROR,
        message: "parse error".into(),
        data: Some(Value::String(detail.to_owned())),
    };
    serde_json::to_string(&json!({ "jsonrpc": JSONRPC_VERSION, "id": null, "error": error }))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, mut frame: String) -> std::io::Result<()> {
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

pub struct ClinicServer {
    store: Store,
    tools: ToolKit,
    initialized: AtomicBool,
}

impl ClinicServer {
    pub fn new(store: Store, tools: ToolKit) -> Self {
        Self {
            store,
            tools,
            initialized: AtomicBool::new(false),
        }
    }

    /// Serve until `reader` reaches end of stream
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message = match JsonRpcMessage::parse(line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "unparseable frame");
                    write_frame(&mut writer, parse_error_frame(&e.to_string())?).await?;
                    continue;
                }
            };

            let request_id = match &message {
                JsonRpcMessage::Request(r) => Some(r.id.clone()),
                _ => None,
            };
            let server = Arc::clone(&self);
            let reply = match tokio::task::spawn_blocking(move || server.handle(message)).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "request handler panicked");
                    request_id
                        .map(|id| JsonRpcResponse::error(id, codes::INTERNAL_ERROR, "internal error").into())
                }
            };

            if let Some(reply) = reply {
                write_frame(&mut writer, reply.to_line()?).await?;
            }
        }
        info!("client closed the channel, shutting down");
        Ok(())
    }

    /// Answer one frame; notifications and stray responses get no reply
    pub fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => {
                debug!(method = %request.method, id = %request.id, "request");
                let id = request.id.clone();
                let response = match self.dispatch(&request) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(error) => JsonRpcResponse {
                        jsonrpc: JSONRPC_VERSION.into(),
                        id,
                        result: None,
                        error: Some(error),
                    },
                };
                Some(response.into())
            }
            JsonRpcMessage::Notification(note) => {
                if note.method == methods::INITIALIZED {
                    info!("client finished the handshake");
                } else {
                    debug!(method = %note.method, "ignoring notification");
                }
                None
            }
            JsonRpcMessage::Response(response) => {
                warn!(id = %response.id, "unexpected response from client");
                None
            }
        }
    }

    fn dispatch(&self, request: &JsonRpcRequest) -> std::result::Result<Value, JsonRpcError> {
        let method = request.method.as_str();
        if method != methods::INITIALIZE && method != methods::PING && !self.initialized.load(Ordering::SeqCst) {
            return Err(rpc_error(codes::INVALID_REQUEST, "server not initialized"));
        }
        match method {
            methods::INITIALIZE => self.initialize(),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => to_value(ToolsListResult {
                tools: self.tools.descriptors(),
                next_cursor: None,
            }),
            methods::TOOLS_CALL => self.call_tool(params(request)?),
            methods::RESOURCES_LIST => self.list_resources(),
            methods::RESOURCES_READ => self.read_resource(&params::<ReadResourceParams>(request)?),
            other => Err(rpc_error(codes::METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }

    fn initialize(&self) -> std::result::Result<Value, JsonRpcError> {
        self.initialized.store(true, Ordering::SeqCst);
        to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: json!({"tools": {}, "resources": {}}),
            server_info: Implementation {
                name: "vet-clinic".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some("Veterinary practice records: patients, appointments, weights and vaccinations.".into()),
        })
    }

    fn call_tool(&self, params: CallToolParams) -> std::result::Result<Value, JsonRpcError> {
        let Some(tool) = self.tools.get(&params.name) else {
            return Err(rpc_error(
                codes::INVALID_PARAMS,
                ClinicError::UnknownTool(params.name).to_string(),
            ));
        };
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        let descriptor = tool.descriptor();
        if let Err(violation) = schema::validate(&descriptor.input_schema, &arguments) {
            warn!(tool = %params.name, %violation, "rejected arguments");
            return to_value(CallToolResult::error(format!(
                "Invalid arguments for {}: {violation}",
                params.name
            )));
        }

        let result = match self.store.with_transaction(|tx| tool.execute(tx, &arguments)) {
            Ok(output) => {
                info!(tool = %params.name, summary = %output.summary, "tool succeeded");
                CallToolResult {
                    content: vec![ContentItem::Text { text: output.summary }],
                    is_error: false,
                    structured_content: Some(output.data),
                }
            }
            Err(e) if e.is_client_error() => {
                info!(tool = %params.name, error = %e, "tool refused");
                CallToolResult::error(e.to_string())
            }
            Err(e) => {
                error!(tool = %params.name, error = %e, "tool failed");
                CallToolResult::error(format!("Internal error: {e}"))
            }
        };
        to_value(result)
    }

    fn list_resources(&self) -> std::result::Result<Value, JsonRpcError> {
        let patients = self
            .store
            .with_transaction(|tx| PatientRepository::list(tx))
            .map_err(internal)?;

        let mut resources = vec![ResourceInfo {
            uri: ResourceAddress::all_patients().uri(),
            name: "All patients".into(),
            description: Some("Every patient on record".into()),
            mime_type: Some(JSON_MIME.into()),
        }];
        resources.extend(patients.into_iter().map(|p| ResourceInfo {
            uri: ResourceAddress::patient(&p.id).uri(),
            name: format!("{} ({})", p.name, p.species),
            description: Some("Patient record with full history".into()),
            mime_type: Some(JSON_MIME.into()),
        }));
        to_value(ResourcesListResult { resources })
    }

    fn read_resource(&self, params: &ReadResourceParams) -> std::result::Result<Value, JsonRpcError> {
        let address: ResourceAddress = params
            .uri
            .parse()
            .map_err(|e: agent_core::AgentError| rpc_error(codes::INVALID_PARAMS, e.to_string()))?;

        let body = self
            .store
            .with_transaction(|tx| match &address.key {
                ResourceKey::All => Ok(serde_json::to_value(PatientRepository::list(tx)?)?),
                ResourceKey::Id(id) => match PatientRepository::history(tx, id) {
                    Ok(history) => Ok(serde_json::to_value(history)?),
                    Err(ClinicError::PatientNotFound(_)) => Err(ClinicError::UnknownResource(params.uri.clone())),
                    Err(e) => Err(e),
                },
            })
            .map_err(|e| match e {
                ClinicError::UnknownResource(_) => rpc_error(codes::INVALID_PARAMS, e.to_string()),
                other => internal(other),
            })?;

        let text = serde_json::to_string_pretty(&body).map_err(|e| internal(e.into()))?;
        to_value(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: address.uri(),
                mime_type: Some(JSON_MIME.into()),
                text,
            }],
        })
    }
}

fn rpc_error(code: i64, message: impl Into<String>) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data: None,
    }
}

fn internal(e: ClinicError) -> JsonRpcError {
    error!(error = %e, "request failed");
    rpc_error(codes::INTERNAL_ERROR, e.to_string())
}

fn params<T: DeserializeOwned>(request: &JsonRpcRequest) -> std::result::Result<T, JsonRpcError> {
    let raw = request.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(raw).map_err(|e| rpc_error(codes::INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_value(value: impl serde::Serialize) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::protocol::RequestId;

    fn server() -> ClinicServer {
        let store = Store::open_in_memory().unwrap();
        store.seed_if_empty().unwrap();
        ClinicServer::new(store, ToolKit::standard())
    }

    fn request(server: &ClinicServer, id: i64, method: &str, params: Value) -> JsonRpcResponse {
        let message = JsonRpcRequest::new(RequestId::Number(id), method, Some(params)).into();
        match server.handle(message) {
            Some(JsonRpcMessage::Response(response)) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn ready() -> ClinicServer {
        let server = server();
        let reply = request(&server, 1, "initialize", json!({"protocolVersion": PROTOCOL_VERSION, "clientInfo": {"name": "t", "version": "0"}}));
        assert!(reply.error.is_none());
        server
    }

    fn call(server: &ClinicServer, name: &str, arguments: Value) -> CallToolResult {
        let reply = request(server, 9, "tools/call", json!({"name": name, "arguments": arguments}));
        serde_json::from_value(reply.result.unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_requests_before_handshake() {
        let reply = request(&server(), 1, "tools/list", json!({}));
        assert_eq!(reply.error.unwrap().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_handshake_and_catalog() {
        let server = ready();
        let reply = request(&server, 2, "tools/list", json!({}));
        let list: ToolsListResult = serde_json::from_value(reply.result.unwrap()).unwrap();
        assert_eq!(list.tools.len(), 8);
        assert!(list.tools.iter().any(|t| t.name == "create_patient"));
    }

    #[test]
    fn test_create_then_lookup() {
        let server = ready();
        let created = call(&server, "create_patient", json!({"id": "P010", "name": "Rex", "species": "Dog"}));
        assert!(!created.is_error);
        assert_eq!(created.structured_content.unwrap()["patient"]["id"], "P010");

        let found = call(&server, "get_patient", json!({"identifier": "rex"}));
        assert_eq!(found.structured_content.unwrap()["patient"]["species"], "Dog");
    }

    #[test]
    fn test_schema_violation_is_an_error_result() {
        let server = ready();
        let result = call(&server, "record_weight", json!({"patient_id": "P001", "weight": -2}));
        assert!(result.is_error);

        let history = call(&server, "get_patient_history", json!({"patient_id": "P001"}));
        assert_eq!(history.structured_content.unwrap()["weights"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_domain_failure_is_an_error_result() {
        let server = ready();
        let result = call(&server, "create_patient", json!({"id": "P001", "name": "Max", "species": "Dog"}));
        assert!(result.is_error);
        assert_eq!(result.into_tool_result("c").payload.to_text(), "A patient with id P001 already exists");
    }

    #[test]
    fn test_unknown_tool_and_method() {
        let server = ready();
        let reply = request(&server, 3, "tools/call", json!({"name": "drop_tables", "arguments": {}}));
        assert_eq!(reply.error.unwrap().code, codes::INVALID_PARAMS);

        let reply = request(&server, 4, "prompts/list", json!({}));
        assert_eq!(reply.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_resources() {
        let server = ready();
        let reply = request(&server, 5, "resources/list", json!({}));
        let list: ResourcesListResult = serde_json::from_value(reply.result.unwrap()).unwrap();
        assert_eq!(list.resources[0].uri, "patients://all");
        assert_eq!(list.resources.len(), 4);

        let reply = request(&server, 6, "resources/read", json!({"uri": "patients://P002"}));
        let read: ReadResourceResult = serde_json::from_value(reply.result.unwrap()).unwrap();
        assert_eq!(read.contents[0].json().unwrap()["patient"]["name"], "Luna");

        let reply = request(&server, 7, "resources/read", json!({"uri": "patients://P404"}));
        assert_eq!(reply.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[test]
    fn test_notifications_get_no_reply() {
        let server = ready();
        let note = agent_core::protocol::JsonRpcNotification::new("notifications/initialized", None);
        assert!(server.handle(note.into()).is_none());
    }

    #[tokio::test]
    async fn test_serves_line_delimited_frames() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"t","version":"0"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "garbage\n",
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let mut output = Vec::new();
        Arc::new(server()).serve(input.as_bytes(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let frames: Vec<&str> = text.lines().collect();
        assert_eq!(frames.len(), 3);

        let parse_error: Value = serde_json::from_str(frames[1]).unwrap();
        assert_eq!(parse_error["id"], Value::Null);
        assert_eq!(parse_error["error"]["code"], codes::PARSE_ERROR);

        let pong = JsonRpcMessage::parse(frames[2]).unwrap();
        assert!(matches!(&pong, JsonRpcMessage::Response(r) if r.id == RequestId::Number(2)));
    }

    #[tokio::test]
    async fn test_keeps_serving_after_a_parse_error() {
        let input = concat!("{\"jsonrpc\":\n", r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#, "\n");
        let mut output = Vec::new();
        Arc::new(server()).serve(input.as_bytes(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let frames: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(frames[0]["error"]["message"], "parse error");
        assert_eq!(frames[1]["id"], "a");
        assert!(frames[1]["error"].is_null());
    }
}
