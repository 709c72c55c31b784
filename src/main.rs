use clap::{Parser, Subcommand};
use tracing::{error, info};

mod allowlist;
mod config;
mod error;
mod ingest;
mod logging;
mod ports;
mod server;
mod sheets;
mod store;
mod telegram;

use crate::allowlist::AllowlistGate;
use crate::config::Config;
use crate::ingest::{Ingestor, MessageRing};
use crate::ingest::notify::WebhookNotifier;
use crate::ports::{MessengerPort, SheetPort};
use crate::server::AppState;
use crate::sheets::GoogleSheets;
use crate::store::ArtifactStore;
use crate::telegram::TelegramMessenger;
use std::sync::Arc;
use tokio::sync::watch;

const MESSAGE_RING_CAPACITY: usize = 512;

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(about = "Whitelist-gated media ingestion service for chat attachments")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion listener and the HTTP façade
    Serve {
        /// Listening port (overrides the PORT environment variable)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Delete all stored artifacts and clear the last-artifact record
    Evict,
}

async fn serve(config: Config, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(ArtifactStore::open(config.artifact_dir.clone())?);
    let ring = Arc::new(MessageRing::new(MESSAGE_RING_CAPACITY));

    let messenger: Arc<dyn MessengerPort> = Arc::new(TelegramMessenger::new(
        config.bot_token(),
        config.http_timeout,
        config.poll_timeout,
    )?);

    let (sheets, gate): (Option<Arc<dyn SheetPort>>, Arc<AllowlistGate>) = match &config.allowlist
    {
        Some(sheet_cfg) => {
            let sheets: Arc<dyn SheetPort> = Arc::new(GoogleSheets::new(
                sheet_cfg.api_key.clone(),
                config.http_timeout,
            )?);
            let gate = Arc::new(AllowlistGate::new(sheets.clone(), sheet_cfg.clone()));
            (Some(sheets), gate)
        }
        None => {
            info!("No allow-list sheet configured; every sender is allowed");
            (None, Arc::new(AllowlistGate::disabled()))
        }
    };

    let notifier = match &config.webhook_url {
        Some(url) => Some(WebhookNotifier::new(url.clone(), config.http_timeout)?),
        None => None,
    };

    let ingestor = Arc::new(Ingestor::new(
        messenger.clone(),
        gate,
        store.clone(),
        ring.clone(),
        notifier,
        config.max_file_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::spawn(ingestor.clone().run(shutdown_rx.clone()));

    let state = Arc::new(AppState {
        store,
        ring,
        ingestor,
        messenger,
        sheets,
    });

    // Propagate ctrl-c to both the listener and the server.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    server::start_server(state, port, shutdown_rx).await?;
    listener.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before logging so RUST_LOG set there reaches the filter
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let config = match Config::from_env() {
                Ok(config) => config,
                Err(e) => {
                    error!("Startup failed: {}", e);
                    return Err(e.into());
                }
            };
            let port = port.unwrap_or(config.port);
            serve(config, port).await?;
        }
        Commands::Evict => {
            let config = Config::from_env()?;
            let store = ArtifactStore::open(config.artifact_dir)?;
            let deleted = store.evict_all()?;
            println!("🧹 Evicted {} artifact(s)", deleted);
        }
    }
    Ok(())
}
