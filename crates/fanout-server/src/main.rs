use anyhow::Result;
use fanout_server::{api, state};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fanout SFU...");

    // Load configuration
    let config = state::Config::load()?;

    // Create application state (starts the renegotiation worker and keyframe ticker)
    let state = state::AppState::new(config.clone())?;

    // Build the router
    let app = api::create_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Listening on http://{}", config.bind_address);
    tracing::info!("Signaling endpoint: ws://{}/websocket", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
