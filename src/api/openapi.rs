use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::metrics::LatencyStats;
use crate::websocket::{BindingStats, DispatcherStats};

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Price Stream API",
        version = "1.0.0",
        description = "Simulated live price streaming over WebSocket, with a small REST surface",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::login,
        handlers::list_symbols,
        handlers::get_prices,
        handlers::get_subscriptions,
        handlers::get_stats,
    ),
    components(
        schemas(
            HealthResponse,
            LoginRequest,
            LoginResponse,
            SymbolListResponse,
            PricesResponse,
            SubscriptionsResponse,
            StatsResponse,
            BindingStats,
            DispatcherStats,
            LatencyStats,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Identity", description = "Identity registration and subscription lookup"),
        (name = "Market Data", description = "Symbols and current prices"),
        (name = "Metrics", description = "Streaming engine counters"),
    )
)]
pub struct ApiDoc;
