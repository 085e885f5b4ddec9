//! stageq CLI: run workflows and inspect their queues.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use stageq::config::Config;
use stageq::config::secrets::redacted;
use stageq::db::Db;
use stageq::model::{EntryFilter, EntryState};
use stageq::storage::QueueStore;
use stageq::telemetry::{TelemetryConfig, init_telemetry};
use stageq::transform::Identity;
use stageq::workflow::registry::BuildOptions;
use stageq::workflow::{Workflow, WorkflowRegistry};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stageq", about = "Durable staged file pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run workflows once: discover, transfer, process
    Run {
        /// Directory containing workflow TOML files
        #[arg(long, default_value = "workflows")]
        workflows: PathBuf,
        /// Workflows to run (default: all)
        names: Vec<String>,
    },
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Print a new keypair for encrypting staged files
    Keygen,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List entries of a queue
    List {
        /// Queue name
        queue: String,
        /// Include completed entries
        #[arg(long)]
        all: bool,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { workflows, names } => cmd_run(workflows, names).await,
        Command::Queue {
            action:
                QueueAction::List {
                    queue,
                    all,
                    limit,
                    json,
                },
        } => {
            let config = Config::from_env()?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            cmd_queue_list(&db, queue, all, limit, json).await
        }
        Command::Keygen => {
            cmd_keygen();
            Ok(())
        }
    }
}

async fn cmd_run(dir: PathBuf, names: Vec<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let mut telemetry = TelemetryConfig::new("stageq");
    telemetry.endpoint = config.otel_endpoint.clone();
    telemetry.log_level = config.log_level.clone();
    let _guard = init_telemetry(telemetry)?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let store: Arc<dyn QueueStore> = Arc::new(db);

    let registry = WorkflowRegistry::load_from_dir(&dir)?;
    let options = BuildOptions {
        scratch: config.scratch(),
        decrypt_as: config.decrypt_identity()?,
    };
    if let Some(key) = &config.decrypt_key {
        tracing::info!(key = %redacted(key), "decryption key configured");
    }

    let selected: Vec<String> = if names.is_empty() {
        registry.names().into_iter().map(str::to_string).collect()
    } else {
        names
    };
    if selected.is_empty() {
        anyhow::bail!("no workflows found in {}", dir.display());
    }

    let mut unclean = 0;
    for name in &selected {
        let workflow_config = registry.build(name, &options).await?;
        let workflow = Workflow::new(workflow_config, store.clone())?;
        let report = workflow.retrieve_and_process().await;
        println!("{report}");
        if !report.is_clean() {
            unclean += 1;
        }
    }

    if unclean > 0 {
        anyhow::bail!("{unclean} workflow(s) left entries pending");
    }
    Ok(())
}

async fn cmd_queue_list(
    db: &Db,
    queue: String,
    all: bool,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let mut filter = EntryFilter::default().queue(&queue).limit(limit);
    if !all {
        filter = filter.state(EntryState::Pending);
    }
    let entries = db.list_entries(&filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<50}  {:<9}  {:<16}  COMPLETED",
        "ID", "KEY", "STATE", "ADDED"
    );
    println!("{}", "-".repeat(110));

    for entry in &entries {
        let key = shorten(&entry.key, 50);
        println!(
            "{:<8}  {:<50}  {:<9}  {:<16}  {}",
            entry.id.0,
            key,
            entry.state().to_string(),
            entry.time_added.format("%Y-%m-%d %H:%M").to_string(),
            entry
                .time_completed
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    println!("\n{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

/// Keep the end of long keys; it holds the file name.
fn shorten(key: &str, width: usize) -> String {
    let count = key.chars().count();
    if count <= width {
        return key.to_string();
    }
    let tail: String = key.chars().skip(count - (width - 3)).collect();
    format!("...{tail}")
}

fn cmd_keygen() {
    let identity = Identity::generate();
    println!("# recipient (workflow encrypt_to)");
    println!("{}", identity.recipient().to_base64());
    println!("# private key (STAGEQ_DECRYPT_KEY)");
    println!("{}", identity.to_secret().expose_secret());
}
