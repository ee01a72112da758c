use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Symbol;

/// Server → client events
///
/// Prices serialize as JSON numbers, e.g.
/// `{"event":"priceUpdate","prices":{"GOOG":101.25}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WsMessage {
    /// Bootstrap snapshot sent once after binding
    Init {
        subscriptions: Vec<Symbol>,
        prices: BTreeMap<Symbol, Decimal>,
    },
    /// Delta for the connection's subscribed symbols
    PriceUpdate {
        prices: BTreeMap<Symbol, Decimal>,
    },
    Subscribed {
        symbol: Symbol,
    },
    Unsubscribed {
        symbol: Symbol,
    },
    /// Server heartbeat
    Ping {
        timestamp: DateTime<Utc>,
    },
    /// Reply to a client ping
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    /// One-symbol price snapshot
    pub fn single_price(symbol: Symbol, price: Decimal) -> Self {
        WsMessage::PriceUpdate {
            prices: BTreeMap::from([(symbol, price)]),
        }
    }
}

/// Client → server commands
///
/// Also accepts the older field names (`email`, `ticker`) and the
/// `registerUser` event name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientCommand {
    #[serde(alias = "registerUser")]
    RegisterIdentity {
        #[serde(alias = "email")]
        identity: String,
    },
    Subscribe {
        #[serde(alias = "ticker")]
        symbol: String,
    },
    Unsubscribe {
        #[serde(alias = "ticker")]
        symbol: String,
    },
    Ping,
}

impl ClientCommand {
    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::RegisterIdentity { .. } => "registerIdentity",
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::Ping => "ping",
        }
    }
}
