//! vet-chat
//!
//! Terminal chat with the veterinary assistant over one session.
//! `exit`, `quit` or `bye` ends the session; Ctrl-C cancels and exits.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{AgentError, CancellationToken, LlmProvider, Orchestrator, RunStatus, Session};
use agent_runtime::AnthropicProvider;
use agent_server::ServerConfig;

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    let provider = Arc::new(AnthropicProvider::from_env().context("configuring the Anthropic provider")?);
    let model = provider.info().model;
    let orchestrator = Orchestrator::new(provider, config.orchestrator_config(&model));

    let mut session = Session::open(&config.session_config())
        .await
        .with_context(|| format!("starting tool server '{}'", config.tool_server.program))?;
    println!(
        "Connected to the clinic ({} tools). Type 'exit' to leave.",
        session.registry().len()
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            break;
        }

        match orchestrator.run(&mut session, input, &cancel).await {
            Ok(outcome) => {
                for exec in &outcome.tool_executions {
                    let marker = if exec.result.is_error { "✗" } else { "✓" };
                    println!("  {marker} {}({})", exec.name, exec.arguments);
                }
                match &outcome.status {
                    RunStatus::Completed { text } => println!("\nAssistant: {text}"),
                    RunStatus::Aborted { reason } => println!("\n[{reason}]"),
                }
            }
            Err(AgentError::Cancelled) => {
                println!("\nCancelled.");
                return Ok(());
            }
            Err(e) => {
                eprintln!("\n{}", e.user_message());
                return Err(e.into());
            }
        }
    }

    session.close().await;
    println!("Goodbye.");
    Ok(())
}
