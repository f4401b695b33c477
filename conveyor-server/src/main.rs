use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_engine::Engine;
use conveyor_engine::agent::ProcessRunner;
use conveyor_engine::artifact::LocalArtifactStore;
use conveyor_engine::config::Config;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conveyor_server=debug,conveyor_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor server...");

    // Load and validate configuration
    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    let bind_addr = config.bind_addr.clone();

    // Wire the engine to its collaborators
    let store = Arc::new(LocalArtifactStore::new(config.artifact_dir.clone()));
    let sinks = Engine::sinks_from_config(&config);
    let engine = Arc::new(Engine::start(
        config,
        Arc::new(ProcessRunner::new()),
        store,
        sinks,
    ));

    // Build router with all API endpoints
    let app = conveyor_server::api::create_router(engine);

    tracing::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
