use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::metrics::LatencyStats;
use crate::websocket::{BindingStats, DispatcherStats};

/// Liveness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Currently bound WebSocket connections
    pub connections: usize,
}

/// Request to register an identity without opening a socket
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "trader@example.com")]
    #[serde(alias = "email")]
    pub identity: String,
}

/// Identity registered, with whatever it is already subscribed to
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub identity: String,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SymbolListResponse {
    pub symbols: Vec<String>,
}

/// Current price of every symbol
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PricesResponse {
    pub tick: u64,
    #[schema(value_type = Object, example = json!({"GOOG": 512.37}))]
    pub prices: BTreeMap<String, Decimal>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionsResponse {
    pub identity: String,
    pub subscriptions: Vec<String>,
}

/// Engine counters and latency percentiles
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub identities: usize,
    pub bindings: BindingStats,
    pub dispatcher: DispatcherStats,
    pub latency: Vec<LatencyStats>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
