//! Broadcast Dispatcher
//!
//! Runs once per tick, after the price engine has advanced. Each connection
//! gets one `priceUpdate` restricted to its own view, or nothing if the view
//! does not intersect the changed symbols.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::bindings::BindingTable;
use super::messages::WsMessage;
use crate::engine::PriceUpdate;
use crate::errors::DeliveryFailure;
use crate::metrics::{LatencyGuard, LatencyTracker};
use crate::models::ConnectionId;

/// Outcome of fanning out one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub tick: u64,
    /// Connections that were sent a delta
    pub delivered: usize,
    /// Connections skipped because nothing they watch changed
    pub skipped: usize,
    /// Connections evicted after a failed push
    pub evicted: usize,
}

/// Lifetime dispatcher counters
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DispatcherStats {
    pub ticks_dispatched: u64,
    pub deltas_delivered: u64,
    pub last_tick: u64,
}

pub struct BroadcastDispatcher {
    bindings: Arc<BindingTable>,
    latency: Arc<LatencyTracker>,
    ticks_dispatched: AtomicU64,
    deltas_delivered: AtomicU64,
    last_tick: AtomicU64,
}

impl BroadcastDispatcher {
    pub fn new(bindings: Arc<BindingTable>, latency: Arc<LatencyTracker>) -> Self {
        Self {
            bindings,
            latency,
            ticks_dispatched: AtomicU64::new(0),
            deltas_delivered: AtomicU64::new(0),
            last_tick: AtomicU64::new(0),
        }
    }

    /// Push one tick's deltas to every bound connection
    ///
    /// Works on a snapshot of the binding table so the table lock is not held
    /// during fan-out. Each push happens under the binding's view lock, which
    /// orders it against concurrent subscribe/unsubscribe confirmations.
    pub fn dispatch(&self, update: &PriceUpdate) -> DispatchReport {
        let _guard = LatencyGuard::fanout(&self.latency);

        let mut report = DispatchReport {
            tick: update.tick,
            ..DispatchReport::default()
        };
        let mut failed: Vec<(ConnectionId, DeliveryFailure)> = Vec::new();

        for binding in self.bindings.snapshot() {
            let view = binding.view();

            let prices: BTreeMap<_, _> = view
                .iter()
                .filter_map(|symbol| {
                    update
                        .prices
                        .get(symbol)
                        .map(|price| (symbol.clone(), *price))
                })
                .collect();

            if prices.is_empty() {
                report.skipped += 1;
                continue;
            }

            match binding.push(WsMessage::PriceUpdate { prices }) {
                Ok(()) => report.delivered += 1,
                Err(reason) => failed.push((binding.connection_id, reason)),
            }
        }

        // Evict outside the view locks
        for (connection_id, reason) in failed {
            if self.bindings.evict(connection_id, reason) {
                report.evicted += 1;
            }
        }

        self.ticks_dispatched.fetch_add(1, Ordering::Relaxed);
        self.deltas_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.last_tick.store(update.tick, Ordering::Relaxed);

        trace!(
            "Tick {} dispatched: {} delivered, {} skipped, {} evicted",
            report.tick,
            report.delivered,
            report.skipped,
            report.evicted
        );

        report
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            ticks_dispatched: self.ticks_dispatched.load(Ordering::Relaxed),
            deltas_delivered: self.deltas_delivered.load(Ordering::Relaxed),
            last_tick: self.last_tick.load(Ordering::Relaxed),
        }
    }
}
