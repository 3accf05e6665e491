//! room-store binary: maintenance for a SQLite-backed room store.
//!
//! Usage:
//! ```bash
//! room-store --config store.toml sweep
//! room-store rooms --limit 10
//! room-store show <room-id>
//! ```

use anyhow::{Context, Result};
use cardroom_store::{spawn_sweep_task, Config, RoomStore, SqliteBackend};
use clap::{Parser, Subcommand};
use room_types::RoomId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Maintenance tool for the cardroom room store.
#[derive(Parser, Debug)]
#[command(name = "room-store")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "store.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the periodic directory sweep until interrupted
    Sweep,

    /// List joinable rooms
    Rooms {
        /// Maximum number of rooms to list
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a room snapshot as JSON
    Show {
        /// Room id
        room: String,

        /// Include the cached game state
        #[arg(long)]
        state: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?
    } else {
        tracing::debug!("No config at {}, using defaults", cli.config.display());
        Config::default()
    };

    let backend = SqliteBackend::new(&config.database.path)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
    let store = RoomStore::new(Arc::new(backend), config.store.clone());

    match cli.command {
        Commands::Sweep => {
            let handle = spawn_sweep_task(store, config.cleanup.clone());
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            handle.abort();
        }
        Commands::Rooms { limit } => {
            let rooms = store.fetch_room_directory(limit).await?;
            if rooms.is_empty() {
                println!("No joinable rooms");
            }
            for entry in rooms {
                println!(
                    "{}  host={} ({})  {}/{}",
                    entry.room_id,
                    entry.host_name,
                    entry.host_id,
                    entry.participant_count,
                    entry.expected_players
                );
            }
        }
        Commands::Show { room, state } => {
            let room_id = RoomId::new(room);
            match store.fetch_room_snapshot(&room_id, state).await? {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => anyhow::bail!("room does not exist: {}", room_id),
            }
        }
    }

    Ok(())
}
