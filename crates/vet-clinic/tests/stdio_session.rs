//! End-to-end: the orchestrator driving the real clinic server over stdio.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agent_core::mock::ScriptedProvider;
use agent_core::provider::{ModelReply, ReplyBlock};
use agent_core::{
    CancellationToken, CommandSpec, Orchestrator, ResourceAddress, RunStatus, Session, SessionConfig,
    ToolCall, ToolPayload,
};

fn server_config() -> SessionConfig {
    let command = CommandSpec::new(env!("CARGO_BIN_EXE_vet-clinic-server"))
        .args(["--db", ":memory:"])
        .env("RUST_LOG", "warn");
    SessionConfig::new(command)
        .with_request_timeout(Duration::from_secs(10))
        .with_close_grace(Duration::from_secs(2))
}

fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
    Orchestrator::builder()
        .provider(provider)
        .system_prompt(vet_clinic::VET_ASSISTANT_PROMPT)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_handshake_discovers_clinic_tools() {
    let mut session = Session::open(&server_config()).await.unwrap();
    assert_eq!(session.registry().len(), 8);
    assert!(session.registry().get("record_vaccination").is_some());
    assert_eq!(session.proxy().server_info().map(|i| i.name.as_str()), Some("vet-clinic"));
    session.close().await;
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_create_patient_through_the_loop() {
    let mut session = Session::open(&server_config()).await.unwrap();
    let provider = Arc::new(ScriptedProvider::new([
        ModelReply::new(vec![
            ReplyBlock::text("Registering Rex."),
            ReplyBlock::tool_call(
                "toolu_1",
                "create_patient",
                json!({"id": "P010", "name": "Rex", "species": "Dog", "breed": "Boxer"}),
            ),
        ]),
        ModelReply::text("Rex is registered as P010."),
    ]));

    let outcome = orchestrator(provider.clone())
        .run(&mut session, "Register a boxer called Rex as P010", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed { text: "Rex is registered as P010.".into() });
    assert_eq!(outcome.tool_executions.len(), 1);
    let result = &outcome.tool_executions[0].result;
    assert!(!result.is_error);
    let ToolPayload::Structured(data) = &result.payload else {
        panic!("expected structured output, got {:?}", result.payload);
    };
    assert_eq!(data["patient"]["breed"], "Boxer");

    // The second model call saw the tool result paired with its call
    let second = &provider.requests()[1];
    let answer = second.turns.last().unwrap();
    assert_eq!(answer.tool_results_iter().next().map(|r| r.call_id.as_str()), Some("toolu_1"));

    // The write is visible through the same server
    let lookup = session
        .proxy()
        .invoke(&ToolCall::new("c2", "get_patient", json!({"identifier": "rex"})))
        .await
        .unwrap();
    assert!(lookup.payload.to_text().contains("P010"));
    assert_eq!(session.conversation().len(), 4);

    session.close().await;
}

#[tokio::test]
async fn test_invalid_arguments_go_back_to_the_model() {
    let mut session = Session::open(&server_config()).await.unwrap();
    let provider = Arc::new(ScriptedProvider::new([
        ModelReply::new(vec![ReplyBlock::tool_call(
            "toolu_1",
            "record_weight",
            json!({"patient_id": "P001"}),
        )]),
        ModelReply::text("I need the weight in kilograms."),
    ]));

    let outcome = orchestrator(provider)
        .run(&mut session, "Log a weight for Max", &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let result = &outcome.tool_executions[0].result;
    assert!(result.is_error);
    assert!(result.payload.to_text().contains("weight"));
    assert!(!session.is_closed());

    session.close().await;
}

#[tokio::test]
async fn test_resources_are_readable() {
    let mut session = Session::open(&server_config()).await.unwrap();

    let listed = session.proxy().list_resources().await.unwrap();
    assert_eq!(listed[0].uri, "patients://all");
    assert_eq!(listed.len(), 4);

    let contents = session.proxy().read_resource(&ResourceAddress::patient("P001")).await.unwrap();
    let history = contents.json().unwrap();
    assert_eq!(history["patient"]["name"], "Max");
    assert_eq!(history["vaccinations"].as_array().map(Vec::len), Some(1));

    let all = session.proxy().read_resource(&ResourceAddress::all_patients()).await.unwrap();
    assert_eq!(all.json().unwrap().as_array().map(Vec::len), Some(3));

    assert!(session.proxy().read_resource(&ResourceAddress::patient("P404")).await.is_err());
    session.close().await;
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let mut first = Session::open(&server_config()).await.unwrap();
    let mut second = Session::open(&server_config()).await.unwrap();
    assert_ne!(first.id(), second.id());

    let created = first
        .proxy()
        .invoke(&ToolCall::new("c1", "create_patient", json!({"id": "P020", "name": "Bella", "species": "Cat"})))
        .await
        .unwrap();
    assert!(!created.is_error);

    first.close().await;

    // Each session has its own in-memory database and its own process
    let lookup = second
        .proxy()
        .invoke(&ToolCall::new("c2", "get_patient", json!({"identifier": "P020"})))
        .await
        .unwrap();
    assert!(lookup.payload.to_text().contains("\"found\":false"));
    assert!(second.proxy().is_usable());

    second.close().await;
}
