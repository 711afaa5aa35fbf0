//! # Garage inventory CLI (`garage`)
//!
//! ## Usage
//!
//! ```bash
//! garage --config ./config/garage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `garage init` | Create the SQLite database, apply the schema, seed categories |
//! | `garage serve` | Start the HTTP server |
//! | `garage items [--zone Z] [--category C]` | Print the inventory |
//! | `garage sessions` | Print capture sessions |
//! | `garage review <session_id>` | Print the open proposals of a session |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use garage_inventory::{config, db, items, migrate, review, server, sessions};

/// Garage inventory: capture frames, review detections, keep track of what is on the shelves.
#[derive(Parser)]
#[command(name = "garage", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/garage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed the default categories.
    ///
    /// Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// List inventory items.
    Items {
        /// Only items in this zone.
        #[arg(long)]
        zone: Option<String>,

        /// Only items in this category.
        #[arg(long)]
        category: Option<String>,
    },

    /// List capture sessions, newest first.
    Sessions,

    /// Show the proposals awaiting review for a session.
    Review { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("garage_inventory=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Items { zone, category } => {
            let pool = db::connect(&cfg).await?;
            items::run_list_items(&pool, &items::ItemFilter { zone, category }).await?;
            pool.close().await;
        }
        Commands::Sessions => {
            let pool = db::connect(&cfg).await?;
            sessions::run_list_sessions(&pool).await?;
            pool.close().await;
        }
        Commands::Review { session_id } => {
            let pool = db::connect(&cfg).await?;
            review::run_review(&pool, &session_id).await?;
            pool.close().await;
        }
    }

    Ok(())
}
