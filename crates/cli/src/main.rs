//! `certflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the dispatcher, scheduler and API server.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow graph JSON file.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use acme::{AcmeClient, HttpBackend};
use api::AppState;
use db::pool::{create_pool, run_migrations};
use db::{MemoryStore, PgStore, Repositories, WorkflowGraph};
use nodes::NodeServices;
use queue::{register_retention, CronScheduler, DispatcherConfig, WorkflowDispatcher, WorkflowScheduler};

mod config;

use config::ServerConfig;

#[derive(Parser)]
#[command(
    name = "certflow",
    about = "Certificate lifecycle automation: issue, deploy, monitor and notify",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dispatcher, cron scheduler and REST API server.
    Serve {
        #[command(flatten)]
        config: ServerConfig,
        /// Keep everything in memory instead of Postgres.
        #[arg(long)]
        in_memory: bool,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow graph JSON file.
    Validate {
        /// Either a graph (`{"nodes": [...]}`) or a workflow holding one.
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, in_memory } => serve(config, in_memory).await,
        Command::Migrate { database_url } => {
            info!("running migrations");
            let pool = create_pool(&database_url, 2).await?;
            run_migrations(&pool).await?;
            info!("migrations applied");
            Ok(())
        }
        Command::Validate { path } => {
            let graph = read_graph(&path)?;
            match engine::validate_graph(&graph) {
                Ok(()) => {
                    println!("workflow is valid: {} nodes", graph.walk().len());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn serve(config: ServerConfig, in_memory: bool) -> anyhow::Result<()> {
    let repos = if in_memory {
        info!("using the in-memory store");
        Repositories::from_store(Arc::new(MemoryStore::new()))
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required unless --in-memory is given")?;
        let pool = create_pool(url, config.db_max_connections).await?;
        run_migrations(&pool).await?;
        Repositories::from_store(Arc::new(PgStore::new(pool)))
    };

    let acme = AcmeClient::new(repos.accounts.clone(), Arc::new(HttpBackend::new()?));
    let services = NodeServices::new(repos.clone(), acme.clone(), &config.data_dir);
    let registry = engine::standard_registry(&services);

    let mut dispatcher_config = DispatcherConfig::default();
    if let Some(max) = config.max_concurrency {
        dispatcher_config.max_concurrency = max;
    }
    let dispatcher = WorkflowDispatcher::new(repos.clone(), registry, dispatcher_config);
    dispatcher.bootup().await?;

    let cron = CronScheduler::new();
    let scheduler = WorkflowScheduler::new(cron.clone(), repos.clone(), dispatcher.clone());
    scheduler.register_all().await?;
    register_retention(&cron, repos.clone())?;

    let app = api::router(AppState {
        repos,
        dispatcher: dispatcher.clone(),
        scheduler,
        acme,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(bind = %config.bind, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    cron.shutdown();
    dispatcher.shutdown().await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GraphFile {
    Workflow { graph: WorkflowGraph },
    Graph(WorkflowGraph),
}

fn read_graph(path: &Path) -> anyhow::Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let file: GraphFile = serde_json::from_str(&content).context("invalid workflow JSON")?;
    Ok(match file {
        GraphFile::Workflow { graph } => graph,
        GraphFile::Graph(graph) => graph,
    })
}
