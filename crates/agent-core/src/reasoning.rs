//! Turn Loop
//!
//! The orchestrator drives a session through
//! `AwaitingModel -> ModelResponded -> {ExecutingTools -> AwaitingModel} | Terminal`.
//! Every tool call the model makes is answered by exactly one result in the
//! following user turn, failed calls included, so the model can recover.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, ModelError, Result};
use crate::message::{ContentBlock, Role, Turn, verify_pairing};
use crate::provider::{GenerationOptions, LlmProvider, ModelReply, ModelRequest, ReplyBlock, TokenUsage};
use crate::proxy::ToolProviderProxy;
use crate::session::Session;
use crate::tool::{ToolCall, ToolResult};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Use the available tools whenever they help answer the request, \
and summarize their results for the user.";

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// System instructions sent with every model call
    pub system_prompt: String,

    /// Maximum model calls per run
    pub max_iterations: usize,

    pub generation: GenerationOptions,

    /// Deadline for one model call
    pub model_timeout: Duration,

    /// Tool output longer than this many characters is cut
    pub max_tool_result_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            generation: GenerationOptions::default(),
            model_timeout: Duration::from_secs(90),
            max_tool_result_chars: 16_000,
        }
    }
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The model answered without requesting tools
    Completed { text: String },
    /// The iteration bound was reached
    Aborted { reason: String },
}

/// One tool invocation performed during a run
#[derive(Clone, Debug, Serialize)]
pub struct ToolExecution {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: ToolResult,
}

/// Result of one run
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,

    /// Turns this run added to the conversation
    pub turns: Vec<Turn>,

    /// Tool invocations in execution order
    pub tool_executions: Vec<ToolExecution>,

    /// Model calls made
    pub iterations: usize,

    pub usage: TokenUsage,
}

impl RunOutcome {
    /// Final answer, or the abort diagnostic
    pub fn text(&self) -> &str {
        match &self.status {
            RunStatus::Completed { text } => text,
            RunStatus::Aborted { reason } => reason,
        }
    }

    pub const fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }
}

enum LoopState {
    AwaitingModel,
    ModelResponded(ModelReply),
    ExecutingTools(Vec<ToolCall>),
    Terminal(RunStatus),
}

/// Drives the model and tool provider to a terminal state
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run one user input to completion.
    ///
    /// New turns are committed to the session only when the run reaches a
    /// terminal state. Any error, cancellation included, closes the session
    /// before it is returned, and the partial turns are discarded.
    pub async fn run(
        &self,
        session: &mut Session,
        input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if session.is_closed() {
            return Err(AgentError::Session(format!("session {} is closed", session.id())));
        }
        let input = input.into();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.drive(session, input) => result,
        };

        match result {
            Ok(outcome) => {
                session.commit(outcome.turns.iter().cloned());
                info!(
                    session_id = %session.id(),
                    iterations = outcome.iterations,
                    tools = outcome.tool_executions.len(),
                    completed = outcome.is_completed(),
                    "run finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(session_id = %session.id(), kind = %e.kind(), error = %e, "run failed, closing session");
                session.close().await;
                Err(e)
            }
        }
    }

    async fn drive(&self, session: &Session, input: String) -> Result<RunOutcome> {
        let catalog = session.registry().catalog().to_vec();
        let mut draft = vec![Turn::user(input)];
        let mut tool_executions = Vec::new();
        let mut usage = TokenUsage::default();
        let mut iterations = 0;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= self.config.max_iterations {
                        LoopState::Terminal(RunStatus::Aborted {
                            reason: format!(
                                "Stopped after {iterations} model calls without a final answer."
                            ),
                        })
                    } else {
                        iterations += 1;
                        let request = ModelRequest {
                            system: Some(self.config.system_prompt.clone()).filter(|s| !s.is_empty()),
                            turns: session.conversation().turns().iter().chain(&draft).cloned().collect(),
                            tools: catalog.clone(),
                            options: self.config.generation.clone(),
                        };
                        debug!(iteration = iterations, turns = request.turns.len(), "calling model");
                        let reply = self.call_model(&request).await?;
                        if let Some(u) = &reply.usage {
                            usage.add(u);
                        }
                        LoopState::ModelResponded(reply)
                    }
                }

                LoopState::ModelResponded(mut reply) => {
                    let calls = prepare_calls(&mut reply)?;
                    if reply.content.is_empty() {
                        LoopState::Terminal(RunStatus::Completed { text: String::new() })
                    } else {
                        let turn = Turn::new(
                            Role::Assistant,
                            reply.content.into_iter().map(ContentBlock::from).collect(),
                        );
                        let text = turn.text();
                        draft.push(turn);
                        if calls.is_empty() {
                            LoopState::Terminal(RunStatus::Completed { text })
                        } else {
                            LoopState::ExecutingTools(calls)
                        }
                    }
                }

                LoopState::ExecutingTools(calls) => {
                    let mut results = Vec::with_capacity(calls.len());
                    for call in calls {
                        let result = self.execute(session.proxy(), &call).await?;
                        tool_executions.push(ToolExecution {
                            call_id: call.id,
                            name: call.name,
                            arguments: call.arguments,
                            result: result.clone(),
                        });
                        results.push(result);
                    }
                    let answer = Turn::tool_results(results);
                    if let Some(request) = draft.last() {
                        verify_pairing(request, &answer)?;
                    }
                    draft.push(answer);
                    LoopState::AwaitingModel
                }

                LoopState::Terminal(status) => {
                    if let RunStatus::Aborted { reason } = &status {
                        warn!(iterations, "iteration bound reached");
                        draft.push(Turn::assistant(reason.clone()));
                    }
                    return Ok(RunOutcome {
                        status,
                        turns: draft,
                        tool_executions,
                        iterations,
                        usage,
                    });
                }
            };
        }
    }

    async fn call_model(&self, request: &ModelRequest) -> Result<ModelReply> {
        let timeout = self.config.model_timeout;
        tokio::time::timeout(timeout, self.provider.complete(request))
            .await
            .unwrap_or_else(|_| Err(ModelError::Timeout(timeout).into()))
    }

    /// Invoke one tool; tool-level failures come back as error results
    async fn execute(&self, proxy: &ToolProviderProxy, call: &ToolCall) -> Result<ToolResult> {
        let result = match proxy.invoke(call).await {
            Ok(result) => result,
            Err(e) if e.is_recoverable() => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                ToolResult::failure(&call.id, e.to_string())
            }
            Err(e) => return Err(e),
        };
        debug!(tool = %call.name, call_id = %call.id, is_error = result.is_error, "tool call answered");
        Ok(result.truncated_to(self.config.max_tool_result_chars))
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Give every call an id and reject duplicates within one reply
fn prepare_calls(reply: &mut ModelReply) -> Result<Vec<ToolCall>> {
    let mut seen = HashSet::new();
    let mut calls = Vec::new();
    for block in &mut reply.content {
        let ReplyBlock::ToolCall(call) = block else {
            continue;
        };
        if call.id.trim().is_empty() {
            call.id = format!("call_{}", Uuid::new_v4().simple());
        }
        if !seen.insert(call.id.clone()) {
            return Err(AgentError::Protocol(format!(
                "model reused tool call id '{}' within one reply",
                call.id
            )));
        }
        calls.push(call.clone());
    }
    Ok(calls)
}

/// Builder for Orchestrator configuration
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.generation.max_tokens = max;
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    #[must_use]
    pub const fn model_timeout(mut self, timeout: Duration) -> Self {
        self.config.model_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_tool_result_chars(mut self, max: usize) -> Self {
        self.config.max_tool_result_chars = max;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        Ok(Orchestrator::new(provider, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedProvider, ScriptedReply, ScriptedTransport, TransportTap};
    use crate::protocol::CallToolResult;
    use crate::session::SessionConfig;
    use crate::tool::ToolDescriptor;
    use crate::transport::CommandSpec;
    use serde_json::json;

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "create_patient",
                "Register a new patient",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "species": {"type": "string"}
                    },
                    "required": ["id", "name", "species"]
                }),
            ),
            ToolDescriptor::new("list_patients", "List all patients", json!({"type": "object"})),
        ]
    }

    async fn session_over(transport: ScriptedTransport) -> (Session, TransportTap) {
        let tap = transport.tap();
        let config = SessionConfig::new(CommandSpec::new("unused"));
        let session = Session::with_transport(Box::new(transport), &config).await.unwrap();
        (session, tap)
    }

    async fn clinic_session() -> (Session, TransportTap) {
        session_over(ScriptedTransport::tool_server(catalog(), |name, args| match name {
            "create_patient" => CallToolResult::text(format!(
                "Patient {} created",
                args["id"].as_str().unwrap_or_default()
            )),
            _ => CallToolResult::text("P001 Max"),
        }))
        .await
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::builder().provider(provider).build().unwrap()
    }

    fn rex() -> Value {
        json!({"id": "P010", "name": "Rex", "species": "Dog"})
    }

    #[tokio::test]
    async fn test_create_patient_round_trip() {
        let provider = Arc::new(ScriptedProvider::new([
            ModelReply::new(vec![ReplyBlock::tool_call("toolu_1", "create_patient", rex())]),
            ModelReply::text("Created."),
        ]));
        let (mut session, tap) = clinic_session().await;

        let outcome = orchestrator(provider.clone())
            .run(&mut session, "Register Rex the dog as P010", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed { text: "Created.".into() });
        assert_eq!(outcome.iterations, 2);
        assert_eq!(tap.tool_calls_sent(), 1);

        let execution = &outcome.tool_executions[0];
        assert_eq!(execution.name, "create_patient");
        assert_eq!(execution.arguments, rex());
        assert!(!execution.result.is_error);
        assert_eq!(execution.result.payload.to_text(), "Patient P010 created");

        // The second model call sees the call answered in the following turn.
        let second = &provider.requests()[1];
        assert_eq!(second.turns.len(), 3);
        verify_pairing(&second.turns[1], &second.turns[2]).unwrap();

        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[3].text(), "Created.");
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_aborts_at_exactly_the_iteration_bound() {
        let provider = Arc::new(ScriptedProvider::repeating(ModelReply::new(vec![
            ReplyBlock::tool_call("toolu_loop", "list_patients", json!({})),
        ])));
        let (mut session, tap) = clinic_session().await;
        let orchestrator = Orchestrator::builder()
            .provider(provider.clone())
            .max_iterations(3)
            .build()
            .unwrap();

        let outcome = orchestrator
            .run(&mut session, "loop forever", &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome.status, RunStatus::Aborted { .. }));
        assert_eq!(outcome.iterations, 3);
        assert_eq!(provider.calls(), 3);
        assert_eq!(tap.tool_calls_sent(), 3);

        let last = session.conversation().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), outcome.text());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_arguments_become_an_error_result() {
        let provider = Arc::new(ScriptedProvider::new([
            ModelReply::new(vec![ReplyBlock::tool_call("toolu_1", "create_patient", json!({"id": "P010"}))]),
            ModelReply::text("I need the name and species."),
        ]));
        let (mut session, tap) = clinic_session().await;

        let outcome = orchestrator(provider.clone())
            .run(&mut session, "Register P010", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(tap.tool_calls_sent(), 0);
        let result = &outcome.tool_executions[0].result;
        assert!(result.is_error);
        assert_eq!(result.call_id, "toolu_1");
        assert!(result.payload.to_text().contains("name"));
    }

    #[tokio::test]
    async fn test_tool_error_reply_is_fed_back() {
        let transport = ScriptedTransport::tool_server(catalog(), |_, _| CallToolResult::error("Patient P404 not found"));
        let (mut session, _tap) = session_over(transport).await;
        let provider = Arc::new(ScriptedProvider::new([
            ModelReply::new(vec![ReplyBlock::tool_call("toolu_1", "list_patients", json!({}))]),
            ModelReply::text("That patient does not exist."),
        ]));

        let outcome = orchestrator(provider).run(&mut session, "Show P404", &CancellationToken::new()).await.unwrap();
        assert!(outcome.tool_executions[0].result.is_error);
        assert_eq!(outcome.text(), "That patient does not exist.");
    }

    #[tokio::test]
    async fn test_hangup_mid_invoke_closes_session_once() {
        let transport = ScriptedTransport::new(|request| match request.method.as_str() {
            "tools/call" => ScriptedReply::Hangup,
            _ => ScriptedTransport::default_reply(request, &catalog()),
        });
        let (mut session, tap) = session_over(transport).await;
        let provider = Arc::new(ScriptedProvider::new([ModelReply::new(vec![ReplyBlock::tool_call(
            "toolu_1",
            "create_patient",
            rex(),
        )])]));

        let err = orchestrator(provider)
            .run(&mut session, "Register Rex", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Session(_)));
        assert!(session.is_closed());
        assert_eq!(tap.close_calls(), 1);
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_is_rejected() {
        let (mut session, _tap) = clinic_session().await;
        session.close().await;
        let provider = Arc::new(ScriptedProvider::new([ModelReply::text("hi")]));

        let err = orchestrator(provider.clone())
            .run(&mut session, "hello", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new([ModelReply::text("late")]).with_delay(Duration::from_secs(120)));
        let (mut session, tap) = clinic_session().await;
        let orchestrator = Orchestrator::builder()
            .provider(provider)
            .model_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = orchestrator.run(&mut session, "hello", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Model(ModelError::Timeout(_))));
        assert!(session.is_closed());
        assert_eq!(tap.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_partial_state() {
        let provider = Arc::new(ScriptedProvider::new([ModelReply::text("never seen")]).with_delay(Duration::from_secs(60)));
        let (mut session, tap) = clinic_session().await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = orchestrator(provider).run(&mut session, "hello", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(session.is_closed());
        assert!(session.conversation().is_empty());
        assert_eq!(tap.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_output_is_truncated() {
        let transport = ScriptedTransport::tool_server(catalog(), |_, _| CallToolResult::text("x".repeat(500)));
        let (mut session, _tap) = session_over(transport).await;
        let provider = Arc::new(ScriptedProvider::new([
            ModelReply::new(vec![ReplyBlock::tool_call("toolu_1", "list_patients", json!({}))]),
            ModelReply::text("done"),
        ]));
        let orchestrator = Orchestrator::builder()
            .provider(provider)
            .max_tool_result_chars(100)
            .build()
            .unwrap();

        let outcome = orchestrator.run(&mut session, "list", &CancellationToken::new()).await.unwrap();
        let result = &outcome.tool_executions[0].result;
        assert!(result.truncated);
        assert!(result.payload.to_text().ends_with("[truncated: 100 of 500 characters shown]"));
    }

    #[tokio::test]
    async fn test_mixed_reply_and_generated_ids() {
        let provider = Arc::new(ScriptedProvider::new([
            ModelReply::new(vec![
                ReplyBlock::text("Let me look."),
                ReplyBlock::tool_call("", "list_patients", json!({})),
                ReplyBlock::tool_call("", "list_patients", json!({})),
            ]),
            ModelReply::text("Two lookups done."),
        ]));
        let (mut session, tap) = clinic_session().await;

        let outcome = orchestrator(provider).run(&mut session, "list twice", &CancellationToken::new()).await.unwrap();

        assert_eq!(tap.tool_calls_sent(), 2);
        let ids: Vec<_> = outcome.tool_executions.iter().map(|e| e.call_id.clone()).collect();
        assert!(ids.iter().all(|id| !id.is_empty()));
        assert_ne!(ids[0], ids[1]);

        let turns = session.conversation().turns();
        assert_eq!(turns[1].text(), "Let me look.");
        assert_eq!(turns[1].tool_calls().count(), 2);
        verify_pairing(&turns[1], &turns[2]).unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_call_ids_are_a_protocol_error() {
        let provider = Arc::new(ScriptedProvider::new([ModelReply::new(vec![
            ReplyBlock::tool_call("dup", "list_patients", json!({})),
            ReplyBlock::tool_call("dup", "list_patients", json!({})),
        ])]));
        let (mut session, tap) = clinic_session().await;

        let err = orchestrator(provider).run(&mut session, "list", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
        assert_eq!(tap.tool_calls_sent(), 0);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_empty_reply_completes_with_empty_text() {
        let provider = Arc::new(ScriptedProvider::new([ModelReply::new(vec![])]));
        let (mut session, _tap) = clinic_session().await;

        let outcome = orchestrator(provider).run(&mut session, "hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.text(), "");
        assert_eq!(session.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_history_carries_across_runs() {
        let provider = Arc::new(ScriptedProvider::new([ModelReply::text("Hi."), ModelReply::text("Still here.")]));
        let (mut session, _tap) = clinic_session().await;
        let orchestrator = orchestrator(provider.clone());

        orchestrator.run(&mut session, "hello", &CancellationToken::new()).await.unwrap();
        orchestrator.run(&mut session, "again", &CancellationToken::new()).await.unwrap();

        assert_eq!(provider.requests()[1].turns.len(), 3);
        assert_eq!(session.conversation().len(), 4);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(Orchestrator::builder().build(), Err(AgentError::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provider_exit_mid_invoke_is_a_session_error() {
        let script = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"sh","version":"0"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"create_patient","description":"Register","inputSchema":{"type":"object"}}]}}'
read line
exit 3
"#;
        let config = SessionConfig::new(CommandSpec::new("sh").arg("-c").arg(script))
            .with_close_grace(Duration::from_millis(200));
        let mut session = Session::open(&config).await.unwrap();
        let provider = Arc::new(ScriptedProvider::new([ModelReply::new(vec![ReplyBlock::tool_call(
            "toolu_1",
            "create_patient",
            rex(),
        )])]));

        let err = orchestrator(provider.clone())
            .run(&mut session, "Register Rex", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Session(_)));
        assert!(session.is_closed());
        assert_eq!(provider.calls(), 1);
    }
}
