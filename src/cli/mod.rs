pub mod commands;
pub mod utils;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::{config, AppConfig};
use crate::database::{DatabaseManager, HierarchyStore, PgStore};

#[derive(Parser)]
#[command(name = "mlmctl")]
#[command(about = "mlmctl - operate the distributor hierarchy and its rank-transition scans")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply database migrations")]
    Migrate,

    #[command(about = "Run a transition scan once")]
    Scan {
        #[command(subcommand)]
        cmd: commands::scan::ScanCommands,
    },

    #[command(about = "Register a new node")]
    Register {
        #[command(subcommand)]
        cmd: commands::register::RegisterCommands,
    },

    #[command(flatten)]
    Inspect(commands::inspect::InspectCommands),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Connection shared by every command.
pub struct CliContext {
    pub config: &'static AppConfig,
    pub pool: PgPool,
    pub store: Arc<dyn HierarchyStore>,
}

impl CliContext {
    pub async fn connect() -> anyhow::Result<Self> {
        let config = config();
        let pool = DatabaseManager::connect(&config.database).await?;
        let store: Arc<dyn HierarchyStore> = Arc::new(PgStore::new(pool.clone()));
        Ok(Self { config, pool, store })
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let ctx = CliContext::connect().await?;

    let result = match cli.command {
        Commands::Migrate => commands::migrate::handle(&ctx, output_format).await,
        Commands::Scan { cmd } => commands::scan::handle(cmd, &ctx, output_format).await,
        Commands::Register { cmd } => commands::register::handle(cmd, &ctx, output_format).await,
        Commands::Inspect(cmd) => commands::inspect::handle(cmd, &ctx, output_format).await,
    };

    DatabaseManager::close(ctx.pool).await;
    result
}
