// Library Crate Root
// lib.rs
//
// main.rs imports through lib.rs like an external crate
pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod state;
pub mod subscription;
pub mod websocket;

// pub use = re-export at crate root
pub use api::create_router;
pub use config::{PricingConfig, StreamConfig};
pub use engine::{PriceEngine, PriceTicker, PriceUpdate};
pub use errors::{ConfigError, DeliveryFailure, StreamError};
pub use models::{ConnectionId, Identity, Symbol, SymbolUniverse};
pub use state::AppState;
pub use subscription::SubscriptionRegistry;
pub use websocket::{BindingTable, BroadcastDispatcher, WsMessage};
