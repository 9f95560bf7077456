use souk_chat::{config::Config, server, store::Store};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Souk chat server starting...");

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.database.display());
    let store = Store::new(&config.database).await?;
    store.init().await?;

    let state = server::AppState::new(store, &config);
    let app = server::router(state);

    info!("Listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
