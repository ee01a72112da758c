use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::price_engine::PriceEngine;
use crate::websocket::{BroadcastDispatcher, DispatchReport};

/// Periodic driver: advance prices, then fan the deltas out
///
/// Ticks never overlap. If one runs long, the next is delayed rather than
/// fired twice in a row.
pub struct PriceTicker {
    prices: Arc<PriceEngine>,
    dispatcher: Arc<BroadcastDispatcher>,
    period: Duration,
}

impl PriceTicker {
    pub fn new(prices: Arc<PriceEngine>, dispatcher: Arc<BroadcastDispatcher>, period: Duration) -> Self {
        Self {
            prices,
            dispatcher,
            period,
        }
    }

    /// Run one full tick synchronously
    pub fn tick_once(&self) -> DispatchReport {
        let update = self.prices.advance();
        self.dispatcher.dispatch(&update)
    }

    /// Tick until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; prices start moving
        // one period after startup
        ticker.tick().await;

        info!("⏱️  Price ticker started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick_once();
                    debug!(
                        "Tick {}: {} deltas, {} evicted",
                        report.tick, report.delivered, report.evicted
                    );
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("⏱️  Price ticker stopped after tick {}", self.prices.tick());
    }

    /// Spawn the tick loop on the runtime; the task ends after `shutdown`
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let ticker = Arc::clone(self);
        tokio::spawn(async move { ticker.run(shutdown).await })
    }
}
