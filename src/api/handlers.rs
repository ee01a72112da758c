use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::info;

use crate::errors::StreamError;
use crate::models::{Identity, Symbol};
use crate::state::AppState;

use super::responses::*;

/// Convert StreamError to HTTP response
impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = match &self {
            StreamError::EmptyIdentity => StatusCode::BAD_REQUEST,
            StreamError::MalformedCommand(_) => StatusCode::BAD_REQUEST,
            StreamError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
            StreamError::IdentityNotFound(_) => StatusCode::NOT_FOUND,
            StreamError::NotBound(_) | StreamError::AlreadyBound { .. } => StatusCode::CONFLICT,
            StreamError::DeliveryFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

fn symbol_names<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Vec<String> {
    symbols.into_iter().map(|s| s.to_string()).collect()
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        connections: state.bindings.len(),
    })
}

/// Register an identity
///
/// Creates an empty subscription set if the identity is new. A later socket
/// bind with the same identity starts from this set.
#[utoipa::path(
    post,
    path = "/api/v1/login",
    tag = "Identity",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Identity registered", body = LoginResponse),
        (status = 400, description = "Blank identity", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StreamError> {
    let identity = Identity::parse(&request.identity)?;
    let subscriptions = state.registry.ensure(&identity).snapshot();

    info!("🔑 Login: {} ({} subscriptions)", identity, subscriptions.len());

    Ok(Json(LoginResponse {
        identity: identity.to_string(),
        subscriptions: symbol_names(&subscriptions),
    }))
}

/// List the symbol universe
#[utoipa::path(
    get,
    path = "/api/v1/symbols",
    tag = "Market Data",
    responses(
        (status = 200, description = "Tradable symbols", body = SymbolListResponse)
    )
)]
pub async fn list_symbols(State(state): State<AppState>) -> Json<SymbolListResponse> {
    Json(SymbolListResponse {
        symbols: symbol_names(state.universe.symbols()),
    })
}

/// Current price of every symbol
#[utoipa::path(
    get,
    path = "/api/v1/prices",
    tag = "Market Data",
    responses(
        (status = 200, description = "Price snapshot", body = PricesResponse)
    )
)]
pub async fn get_prices(State(state): State<AppState>) -> Json<PricesResponse> {
    let tick = state.prices.tick();
    let prices = state
        .prices
        .snapshot_all()
        .into_iter()
        .map(|(symbol, price)| (symbol.to_string(), price))
        .collect();

    Json(PricesResponse {
        tick,
        prices,
        timestamp: Utc::now(),
    })
}

/// Subscription set of an identity
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/{identity}",
    tag = "Identity",
    params(
        ("identity" = String, Path, description = "Identity token")
    ),
    responses(
        (status = 200, description = "Current subscriptions", body = SubscriptionsResponse),
        (status = 404, description = "Identity never seen", body = ErrorResponse)
    )
)]
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<SubscriptionsResponse>, StreamError> {
    let identity = Identity::parse(&raw).map_err(|_| StreamError::IdentityNotFound(raw.clone()))?;
    if !state.registry.contains_identity(&identity) {
        return Err(StreamError::IdentityNotFound(raw));
    }

    Ok(Json(SubscriptionsResponse {
        identity: identity.to_string(),
        subscriptions: symbol_names(&state.registry.get(&identity)),
    }))
}

/// Engine statistics
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Metrics",
    responses(
        (status = 200, description = "Counters and latency percentiles", body = StatsResponse)
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let latency = state.latency.all_stats();

    Json(StatsResponse {
        identities: state.registry.identity_count(),
        bindings: state.bindings.stats(),
        dispatcher: state.dispatcher.stats(),
        latency,
    })
}
