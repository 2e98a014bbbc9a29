//! vet-clinic-server
//!
//! Usage: `vet-clinic-server [--db <path>] [--no-seed]`
//!
//! The database path falls back to `VET_CLINIC_DB`, then `vet_clinic.db`.
//! `:memory:` gives a throwaway database.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vet_clinic::{ClinicServer, Store, ToolKit};

const DEFAULT_DB: &str = "vet_clinic.db";

struct Options {
    db: String,
    seed: bool,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut db = std::env::var("VET_CLINIC_DB").unwrap_or_else(|_| DEFAULT_DB.into());
        let mut seed = true;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => db = args.next().context("--db needs a path")?,
                "--no-seed" => seed = false,
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(Self { db, seed })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout is the protocol channel; logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = Options::parse(std::env::args().skip(1))?;

    let store = Store::open(&options.db).with_context(|| format!("opening database {}", options.db))?;
    if options.seed && store.seed_if_empty()? {
        tracing::info!("Seeded sample patients");
    }

    let tools = ToolKit::standard();
    tracing::info!(db = %options.db, tools = tools.len(), "vet-clinic server ready");

    let server = Arc::new(ClinicServer::new(store, tools));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    server.serve(stdin, tokio::io::stdout()).await?;
    Ok(())
}
