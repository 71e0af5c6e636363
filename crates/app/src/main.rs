mod server;
mod settings;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_answer_core::{AnswerOrchestrator, IndexSource};
use server::AppState;
use settings::Settings;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-answer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Load the knowledge base and serve the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
        bind: String,
        /// Browser origin allowed by CORS.
        #[arg(long, env = "FRONTEND", default_value = "http://localhost:5173")]
        frontend: String,
    },
    /// Build or refresh the persisted chunk and embedding store.
    Ingest,
    /// Answer a single question and print the JSON response.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// List the first chunks of the loaded index.
    Inspect {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Rank chunks against a query by embedding similarity only.
    Sim {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-answer boot"
    );

    match cli.command {
        Command::Serve { bind, frontend } => {
            let orchestrator = orchestrator(&cli.settings)?;
            orchestrator
                .knowledge()
                .ensure_ready()
                .await
                .context("failed to initialise knowledge base")?;

            server::serve(
                AppState {
                    orchestrator: Arc::new(orchestrator),
                },
                &bind,
                &frontend,
            )
            .await?;
        }
        Command::Ingest => {
            let knowledge = cli.settings.knowledge_base()?;
            let index = knowledge
                .ensure_ready()
                .await
                .context("failed to ingest document")?;
            let source = match knowledge.source() {
                Some(IndexSource::Store) => "loaded from store",
                _ => "rebuilt",
            };
            println!(
                "{} chunks {} at {}",
                index.len(),
                source,
                knowledge.options().store_path.display()
            );
        }
        Command::Ask { question } => {
            let orchestrator = orchestrator(&cli.settings)?;
            orchestrator
                .knowledge()
                .ensure_ready()
                .await
                .context("failed to initialise knowledge base")?;

            let answer = orchestrator.ask(&question).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::Inspect { top } => {
            let knowledge = cli.settings.knowledge_base()?;
            knowledge.ensure_ready().await?;
            for preview in knowledge.preview(top) {
                println!("[{} | page:{}] {}", preview.id, preview.page, preview.snippet);
            }
        }
        Command::Sim { query, top } => {
            let knowledge = cli.settings.knowledge_base()?;
            knowledge.ensure_ready().await?;
            for hit in knowledge.similarity(&query, top).await? {
                println!(
                    "score={:.4} [{} | page:{}] {}",
                    hit.score.unwrap_or_default(),
                    hit.id,
                    hit.page,
                    hit.snippet
                );
            }
        }
    }

    Ok(())
}

/// The completion client is built before the index so a missing key fails before ingestion.
fn orchestrator(settings: &Settings) -> anyhow::Result<AnswerOrchestrator> {
    let completion = settings.completion_provider()?;
    let generation = settings.generation_options()?;
    let knowledge = settings.knowledge_base()?;
    Ok(AnswerOrchestrator::new(knowledge, completion, generation))
}
