use std::sync::Arc;

use tracing::{error, info};

use persona_chat::agent::conversation::Conversation;
use persona_chat::agent::gateway::{CompletionGateway, OpenAiGateway, RemoteGateway};
use persona_chat::bus::EventBus;
use persona_chat::config::Config;
use persona_chat::manager::Manager;
use persona_chat::server::{self, AppState};
use persona_chat::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Persona chat starting...");

    let config = Config::from_env()?;

    let bus = Arc::new(EventBus::new());

    info!("Initializing store at {}", config.db_path.display());
    let store = Store::new(&config.db_path).await?;
    store.init().await?;

    let manager = Arc::new(Manager::load(store, bus.clone()).await?);

    let openai = Arc::new(OpenAiGateway::new(&config.gateway)?);
    info!("Using model {}", openai.model());

    // Turns go through a remote /api/chat when configured, the model otherwise
    let turn_gateway: Arc<dyn CompletionGateway> = match &config.remote_url {
        Some(url) => {
            info!("Routing conversation turns through {}", url);
            Arc::new(RemoteGateway::new(url)?)
        }
        None => openai.clone() as Arc<dyn CompletionGateway>,
    };

    let conversation = Arc::new(Conversation::new(
        manager.clone(),
        turn_gateway,
        config.history_window,
    ));

    let app = server::router(Arc::new(AppState {
        chat_gateway: openai,
        conversation,
    }));

    info!("Starting HTTP server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    if let Err(e) = manager.flush().await {
        error!("Failed to flush chat store: {}", e);
    }

    Ok(())
}
