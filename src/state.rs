//! Shared application state
//!
//! Everything a handler or socket task needs, behind `Arc`s so the state can
//! be cloned into every route and connection.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::engine::{PriceEngine, PriceTicker};
use crate::errors::ConfigError;
use crate::metrics::LatencyTracker;
use crate::models::SymbolUniverse;
use crate::subscription::SubscriptionRegistry;
use crate::websocket::{BindingTable, BroadcastDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StreamConfig>,
    pub universe: Arc<SymbolUniverse>,
    pub prices: Arc<PriceEngine>,
    pub registry: Arc<SubscriptionRegistry>,
    pub bindings: Arc<BindingTable>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub latency: Arc<LatencyTracker>,
}

impl AppState {
    /// Build the state with prices seeded from OS entropy
    pub fn new(config: StreamConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let universe = Arc::new(SymbolUniverse::new(&config.symbols)?);
        let prices = PriceEngine::new(Arc::clone(&universe), &config.pricing)?;
        Ok(Self::assemble(config, universe, prices))
    }

    /// Build the state with a reproducible random walk
    pub fn with_seed(config: StreamConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let universe = Arc::new(SymbolUniverse::new(&config.symbols)?);
        let prices = PriceEngine::with_seed(Arc::clone(&universe), &config.pricing, seed)?;
        Ok(Self::assemble(config, universe, prices))
    }

    fn assemble(config: StreamConfig, universe: Arc<SymbolUniverse>, prices: PriceEngine) -> Self {
        let bindings = Arc::new(BindingTable::new());
        let latency = Arc::new(LatencyTracker::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&bindings),
            Arc::clone(&latency),
        ));

        Self {
            config: Arc::new(config),
            universe,
            prices: Arc::new(prices),
            registry: Arc::new(SubscriptionRegistry::new()),
            bindings,
            dispatcher,
            latency,
        }
    }

    /// Start the periodic price ticker
    pub fn spawn_ticker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let ticker = Arc::new(PriceTicker::new(
            Arc::clone(&self.prices),
            Arc::clone(&self.dispatcher),
            self.config.tick_interval(),
        ));
        ticker.spawn(shutdown)
    }
}
