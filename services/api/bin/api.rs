//! Main Entrypoint for the Cascade API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the default character snapshot from disk.
//! 3. Initializing the shared LLM client.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use cascade_api::{config::Config, metrics::MetricsHub, router::create_router, state::AppState};
use cascade_core::{
    llm_client::{LlmClient, OpenAiCompatibleClient},
    registry::Registry,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Characters ---
    let registry = Arc::new(Registry::new(config.characters_path.clone()));
    let outcome = registry
        .load_default()
        .context("Failed to load the default character directory")?;
    info!(
        directory = %registry.default_dir().display(),
        loaded = outcome.loaded_count,
        errors = outcome.error_count,
        "Character snapshot loaded."
    );

    // --- 4. Initialize the LLM Client ---
    let openai_config = OpenAIConfig::new()
        .with_api_base(&config.llm_url)
        .with_api_key(config.llm_api_key.clone().unwrap_or_else(|| "unused".into()));
    let llm_client: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let metrics = MetricsHub::new().context("Failed to initialize metrics")?;
    metrics.record_load(outcome.loaded_count, outcome.error_count);

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        llm_client,
        registry,
        default_snapshot: outcome.snapshot,
        http: reqwest::Client::new(),
        metrics,
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        stt_url = %config.stt_url,
        tts_url = %config.tts_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
