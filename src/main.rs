use price_stream_api::{create_router, AppState, StreamConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_stream_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StreamConfig::from_env()?;
    let addr = config.bind_addr.clone();

    tracing::info!(
        "📈 Streaming {} symbols every {}ms",
        config.symbols.len(),
        config.tick_interval_ms
    );

    let state = AppState::new(config)?;

    // Start the price ticker
    let shutdown = CancellationToken::new();
    let ticker = state.spawn_ticker(shutdown.clone());

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Price Stream API server running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    tracing::info!("");
    tracing::info!("📡 WebSocket Examples:");
    tracing::info!(r#"   {{"event":"registerIdentity","identity":"trader@example.com"}}"#);
    tracing::info!(r#"   {{"event":"subscribe","symbol":"GOOG"}}"#);
    tracing::info!(r#"   {{"event":"unsubscribe","symbol":"GOOG"}}"#);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    ticker.await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

/// Wait for Ctrl+C, then stop the ticker
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("🛑 Shutdown requested");
    shutdown.cancel();
}
