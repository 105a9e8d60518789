mod server;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use cog_core::MetadataPatch;
use cog_store::{ActivationEngine, Settings};

#[derive(Parser)]
#[command(
    name = "coglet",
    about = "Coglet activation engine - weighted memory recall",
    version
)]
struct Cli {
    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    verbose: bool,

    /// Settings file (defaults to <data dir>/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve,

    /// Create an empty memory set
    CreateSet {
        set_id: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// List memory sets
    Sets,

    /// Show a memory set's description and coglet count
    SetInfo { set_id: String },

    /// Delete a memory set and all of its coglets
    DeleteSet { set_id: String },

    /// Remove all coglets from a memory set, keeping the set
    ClearSet { set_id: String },

    /// Add a coglet to a memory set
    Add {
        set_id: String,
        content: String,
        /// Extra metadata as a JSON object
        #[arg(long)]
        meta: Option<String>,
    },

    /// Show a coglet
    Get { id: String },

    /// Merge a JSON object into a coglet's metadata
    Update { id: String, patch: String },

    /// Delete a coglet
    Delete { id: String },

    /// Reinforce coglets by id
    Refresh {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Recall from a memory set and reinforce the activated coglets
    Recall {
        set_id: String,
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let engine = settings
        .open_engine()
        .with_context(|| format!("failed to open store at {}", settings.data_dir().display()))?;

    match cli.command {
        Commands::Serve => cmd_serve(engine).await,
        Commands::CreateSet {
            set_id,
            description,
        } => {
            let store = engine.store();
            store.create_set(&set_id, description.as_deref())?;
            print_json(&store.get_set_info(&set_id)?)
        }
        Commands::Sets => print_json(&engine.store().list_sets()?),
        Commands::SetInfo { set_id } => print_json(&engine.store().get_set_info(&set_id)?),
        Commands::DeleteSet { set_id } => {
            let removed = engine.store().delete_set(&set_id).await?;
            print_json(&serde_json::json!({
                "set_id": set_id,
                "deleted": true,
                "coglets_removed": removed,
            }))
        }
        Commands::ClearSet { set_id } => {
            let removed = engine.store().clear_set(&set_id).await?;
            print_json(&serde_json::json!({
                "set_id": set_id,
                "coglets_removed": removed,
            }))
        }
        Commands::Add {
            set_id,
            content,
            meta,
        } => {
            let metadata = match meta {
                Some(text) => parse_object(&text)?,
                None => Map::new(),
            };
            let id = engine.store().add(&set_id, &content, metadata).await?;
            print_json(&serde_json::json!({ "id": id, "set_id": set_id }))
        }
        Commands::Get { id } => print_json(&engine.store().get(&id)?),
        Commands::Update { id, patch } => {
            let patch = MetadataPatch::from_json(Value::Object(parse_object(&patch)?))?;
            let updated = engine.store().update(&id, patch).await?;
            print_json(&serde_json::json!({ "id": id, "updated": updated }))
        }
        Commands::Delete { id } => {
            let deleted = engine.store().delete(&id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))
        }
        Commands::Refresh { ids } => print_json(&engine.refresh(&ids).await),
        Commands::Recall {
            set_id,
            query,
            top_k,
        } => print_json(&engine.recall(&set_id, &query, top_k).await?),
    }
}

async fn cmd_serve(engine: ActivationEngine) -> Result<()> {
    tracing::info!("starting coglet MCP server");
    let server = server::CogletServer::new(engine);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;
    Ok(())
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text).context("metadata is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("metadata must be a JSON object"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
