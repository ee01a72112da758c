//! Per-connection command processing and bootstrap
//!
//! A `Session` is `Unbound` until the first `registerIdentity` and `Bound`
//! from then on; only disconnect ends a binding. Commands are handled one at
//! a time, so confirmations leave in the order the commands arrived.
//!
//! Lock order, everywhere: identity lock → binding table → binding view.

use chrono::Utc;
use hdrhistogram::Histogram;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::bindings::Binding;
use super::messages::{ClientCommand, WsMessage};
use super::outbound::Outbound;
use crate::errors::{DeliveryFailure, StreamError};
use crate::metrics::{histogram, record_elapsed};
use crate::models::{ConnectionId, Identity, Symbol};
use crate::state::AppState;

/// Command latency samples kept locally before merging into the shared tracker
const LATENCY_BATCH: u64 = 256;

type Failed = Vec<(ConnectionId, DeliveryFailure)>;

/// State of one connection
pub struct Session {
    connection_id: ConnectionId,
    outbound: Outbound,
    state: AppState,
    binding: Option<Arc<Binding>>,
    command_latency: Histogram<u64>,
}

impl Session {
    pub fn new(connection_id: ConnectionId, outbound: Outbound, state: AppState) -> Self {
        Self {
            connection_id,
            outbound,
            state,
            binding: None,
            command_latency: histogram(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.binding.as_ref().map(|b| &b.identity)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Decode and handle one text frame
    pub fn handle_text(&mut self, text: &str) -> Result<(), StreamError> {
        let command: ClientCommand = serde_json::from_str(text)?;
        self.handle(command)
    }

    pub fn handle(&mut self, command: ClientCommand) -> Result<(), StreamError> {
        let start = Instant::now();
        debug!("Connection {} → {}", self.connection_id, command.name());

        let result = match command {
            ClientCommand::RegisterIdentity { identity } => self.bind(&identity),
            ClientCommand::Subscribe { symbol } => self.subscribe(&symbol),
            ClientCommand::Unsubscribe { symbol } => self.unsubscribe(&symbol),
            ClientCommand::Ping => self
                .outbound
                .push(WsMessage::Pong {
                    timestamp: Utc::now(),
                })
                .map_err(|reason| self.delivery_failed(reason)),
        };

        record_elapsed(&mut self.command_latency, start);
        if self.command_latency.len() >= LATENCY_BATCH {
            self.flush_latency();
        }

        result
    }

    /// Remove this connection's binding; the registry entry stays
    pub fn close(&mut self) {
        if let Some(binding) = self.binding.take() {
            self.state.bindings.remove(binding.connection_id);
            info!(
                "👋 Connection {} unbound from {}",
                self.connection_id, binding.identity
            );
        }
        self.outbound.close();
        self.flush_latency();
    }

    fn flush_latency(&mut self) {
        self.state.latency.merge_commands(&self.command_latency);
        self.command_latency.reset();
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    fn bind(&mut self, raw_identity: &str) -> Result<(), StreamError> {
        if let Some(existing) = &self.binding {
            return Err(StreamError::AlreadyBound {
                connection_id: self.connection_id,
                identity: existing.identity.clone(),
            });
        }

        let identity = Identity::parse(raw_identity)?;

        let binding = self.state.registry.update(&identity, |symbols| {
            let view = symbols.clone();
            let prices = self.state.prices.snapshot(view.iter());

            // init goes out before the binding is visible to the dispatcher,
            // so it is always the first event of a bound connection
            self.outbound
                .push(WsMessage::Init {
                    subscriptions: view.iter().cloned().collect(),
                    prices,
                })
                .map_err(|reason| self.delivery_failed(reason))?;

            let binding = Arc::new(Binding::new(
                self.connection_id,
                identity.clone(),
                view,
                self.outbound.clone(),
            ));
            self.state.bindings.insert(Arc::clone(&binding));
            Ok::<_, StreamError>(binding)
        })?;

        info!(
            "🔗 Connection {} bound to {} ({} subscriptions)",
            self.connection_id,
            binding.identity,
            binding.view().len()
        );

        self.binding = Some(binding);
        Ok(())
    }

    // ========================================================================
    // Subscribe / Unsubscribe
    // ========================================================================

    fn subscribe(&self, raw_symbol: &str) -> Result<(), StreamError> {
        let identity = self.bound_identity()?;
        let symbol = self.resolve(raw_symbol)?;

        let failed = self.state.registry.update(&identity, |symbols| {
            if !symbols.insert(symbol.clone()) {
                return None;
            }
            Some(self.propagate_subscribe(&identity, &symbol))
        });

        match failed {
            Some(failed) => {
                info!("➕ {} subscribed to {}", identity, symbol);
                self.evict_failed(failed)
            }
            None => {
                debug!("{} already subscribed to {}", identity, symbol);
                Ok(())
            }
        }
    }

    fn unsubscribe(&self, raw_symbol: &str) -> Result<(), StreamError> {
        let identity = self.bound_identity()?;
        let symbol = self.resolve(raw_symbol)?;

        let failed = self.state.registry.update(&identity, |symbols| {
            if !symbols.remove(&symbol) {
                return None;
            }
            Some(self.propagate_unsubscribe(&identity, &symbol))
        });

        match failed {
            Some(failed) => {
                info!("➖ {} unsubscribed from {}", identity, symbol);
                self.evict_failed(failed)
            }
            None => {
                debug!("{} was not subscribed to {}", identity, symbol);
                Ok(())
            }
        }
    }

    /// Add `symbol` to every live view of `identity`; identity lock held
    ///
    /// The snapshot price is read after the view insert, under the view lock.
    /// A tick that advanced before the read is either delivered to this view
    /// afterwards or already reflected in the snapshot.
    fn propagate_subscribe(&self, identity: &Identity, symbol: &Symbol) -> Failed {
        let mut failed = Vec::new();

        // Every live connection of this identity follows the registry
        for member in self.state.bindings.bound_to(identity) {
            let mut view = member.view();
            if !view.insert(symbol.clone()) {
                continue;
            }

            let mut pushed = member.push(WsMessage::Subscribed {
                symbol: symbol.clone(),
            });
            if let (Ok(()), Some(price)) = (&pushed, self.state.prices.price(symbol)) {
                pushed = member.push(WsMessage::single_price(symbol.clone(), price));
            }
            if let Err(reason) = pushed {
                failed.push((member.connection_id, reason));
            }
        }

        failed
    }

    /// Remove `symbol` from every live view of `identity`; identity lock held
    fn propagate_unsubscribe(&self, identity: &Identity, symbol: &Symbol) -> Failed {
        let mut failed = Vec::new();

        for member in self.state.bindings.bound_to(identity) {
            let mut view = member.view();
            if !view.remove(symbol) {
                continue;
            }

            if let Err(reason) = member.push(WsMessage::Unsubscribed {
                symbol: symbol.clone(),
            }) {
                failed.push((member.connection_id, reason));
            }
        }

        failed
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn bound_identity(&self) -> Result<Identity, StreamError> {
        self.binding
            .as_ref()
            .map(|b| b.identity.clone())
            .ok_or(StreamError::NotBound(self.connection_id))
    }

    fn resolve(&self, raw_symbol: &str) -> Result<Symbol, StreamError> {
        self.state
            .universe
            .resolve(raw_symbol)
            .ok_or_else(|| StreamError::UnknownSymbol(raw_symbol.to_string()))
    }

    fn delivery_failed(&self, reason: DeliveryFailure) -> StreamError {
        StreamError::DeliveryFailed {
            connection_id: self.connection_id,
            reason,
        }
    }

    /// Evict sibling connections whose queue rejected a confirmation
    ///
    /// Returns an error only if this session's own connection failed.
    fn evict_failed(&self, failed: Failed) -> Result<(), StreamError> {
        let mut own_failure = None;

        for (connection_id, reason) in failed {
            self.state.bindings.evict(connection_id, reason);
            if connection_id == self.connection_id {
                own_failure = Some(reason);
            }
        }

        match own_failure {
            Some(reason) => Err(self.delivery_failed(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::{BTreeMap, BTreeSet};
    use std::thread;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn state() -> AppState {
        let config = StreamConfig {
            symbols: vec!["GOOG".to_string(), "TSLA".to_string()],
            ..StreamConfig::default()
        };
        AppState::with_seed(config, 11).unwrap()
    }

    fn connect(state: &AppState, capacity: usize) -> (Session, mpsc::Receiver<WsMessage>) {
        let (outbound, rx) = Outbound::channel(capacity);
        (Session::new(ConnectionId::new(), outbound, state.clone()), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<WsMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn register(identity: &str) -> ClientCommand {
        ClientCommand::RegisterIdentity {
            identity: identity.to_string(),
        }
    }

    fn subscribe(symbol: &str) -> ClientCommand {
        ClientCommand::Subscribe {
            symbol: symbol.to_string(),
        }
    }

    fn unsubscribe(symbol: &str) -> ClientCommand {
        ClientCommand::Unsubscribe {
            symbol: symbol.to_string(),
        }
    }

    fn tick_prices(state: &AppState) -> BTreeMap<Symbol, Decimal> {
        let update = state.prices.advance();
        state.dispatcher.dispatch(&update);
        update.prices.into_iter().collect()
    }

    #[test]
    fn test_bind_emits_empty_init() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();

        assert!(session.is_bound());
        assert_eq!(
            drain(&mut rx),
            vec![WsMessage::Init {
                subscriptions: vec![],
                prices: BTreeMap::new(),
            }]
        );
        assert!(state.registry.contains_identity(&Identity::parse("a").unwrap()));
        assert_eq!(state.bindings.len(), 1);
    }

    #[test]
    fn test_subscribe_then_tick_scenario() {
        let state = state();
        let goog = state.universe.resolve("GOOG").unwrap();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        session.handle(subscribe("GOOG")).unwrap();

        let before = state.prices.price(&goog).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], WsMessage::Subscribed { symbol: goog.clone() });
        assert_eq!(messages[2], WsMessage::single_price(goog.clone(), before));

        tick_prices(&state);
        match drain(&mut rx).as_slice() {
            [WsMessage::PriceUpdate { prices }] => {
                assert_eq!(prices.len(), 1);
                let after = prices[&goog];
                assert!((after - before).abs() <= dec!(5));
                assert!(after >= dec!(10));
                assert_eq!(after, after.round_dp(2));
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        session.handle(subscribe("GOOG")).unwrap();
        drain(&mut rx);

        session.handle(subscribe("GOOG")).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(state.registry.get(session.identity().unwrap()).len(), 1);
    }

    #[test]
    fn test_unknown_symbol_ignored() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        drain(&mut rx);

        let err = session.handle(subscribe("XXXX")).unwrap_err();
        assert!(matches!(err, StreamError::UnknownSymbol(s) if s == "XXXX"));
        assert!(drain(&mut rx).is_empty());
        assert!(state.registry.get(session.identity().unwrap()).is_empty());
    }

    #[test]
    fn test_commands_before_bind_rejected() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        let err = session.handle(subscribe("GOOG")).unwrap_err();
        assert!(matches!(err, StreamError::NotBound(_)));
        assert!(err.is_protocol_misuse());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(state.registry.identity_count(), 0);
    }

    #[test]
    fn test_rebind_rejected_first_binding_kept() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        drain(&mut rx);

        let err = session.handle(register("b")).unwrap_err();
        assert!(matches!(err, StreamError::AlreadyBound { .. }));
        assert_eq!(session.identity().unwrap().as_str(), "a");
        assert!(drain(&mut rx).is_empty());
        assert!(!state.registry.contains_identity(&Identity::parse("b").unwrap()));
    }

    #[test]
    fn test_unsubscribe_stops_updates() {
        let state = state();
        let goog = state.universe.resolve("GOOG").unwrap();
        let (mut session, mut rx) = connect(&state, 64);

        session.handle(register("a")).unwrap();
        session.handle(subscribe("GOOG")).unwrap();
        session.handle(subscribe("TSLA")).unwrap();
        session.handle(unsubscribe("GOOG")).unwrap();

        let confirmations = drain(&mut rx);
        assert_eq!(
            confirmations.last(),
            Some(&WsMessage::Unsubscribed { symbol: goog.clone() })
        );

        for _ in 0..5 {
            tick_prices(&state);
        }
        for message in drain(&mut rx) {
            match message {
                WsMessage::PriceUpdate { prices } => assert!(!prices.contains_key(&goog)),
                other => panic!("unexpected message: {:?}", other),
            }
        }

        // Unsubscribing again is a silent no-op
        session.handle(unsubscribe("GOOG")).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_reconnect_restores_subscriptions() {
        let state = state();
        let (mut first, mut rx) = connect(&state, 16);

        first.handle(register("a")).unwrap();
        first.handle(subscribe("TSLA")).unwrap();
        first.handle(subscribe("GOOG")).unwrap();
        drain(&mut rx);
        first.close();
        assert!(state.bindings.is_empty());

        for _ in 0..3 {
            tick_prices(&state);
        }

        let (mut second, mut rx2) = connect(&state, 16);
        second.handle(register("a")).unwrap();

        match drain(&mut rx2).as_slice() {
            [WsMessage::Init { subscriptions, prices }] => {
                let names: Vec<&str> = subscriptions.iter().map(Symbol::as_str).collect();
                assert_eq!(names, vec!["GOOG", "TSLA"]);
                assert_eq!(prices.len(), 2);
                for (symbol, price) in prices {
                    assert_eq!(Some(*price), state.prices.price(symbol));
                }
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_sibling_connections_both_receive_ticks() {
        let state = state();
        let goog = state.universe.resolve("GOOG").unwrap();
        let (mut first, mut rx1) = connect(&state, 16);
        let (mut second, mut rx2) = connect(&state, 16);

        first.handle(register("a")).unwrap();
        second.handle(register("a")).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        // Second connection learns about the first one's subscribe
        first.handle(subscribe("GOOG")).unwrap();
        assert_eq!(drain(&mut rx1).len(), 2);
        assert_eq!(drain(&mut rx2).len(), 2);

        let prices = tick_prices(&state);
        let expected = WsMessage::PriceUpdate {
            prices: BTreeMap::from([(goog.clone(), prices[&goog])]),
        };
        assert_eq!(drain(&mut rx1), vec![expected.clone()]);
        assert_eq!(drain(&mut rx2), vec![expected]);

        // Unsubscribe from either side applies to both
        second.handle(unsubscribe("GOOG")).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);
        tick_prices(&state);
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_lagging_sibling_evicted_on_confirmation() {
        let state = state();
        let (mut fast, mut fast_rx) = connect(&state, 16);
        let (mut slow, _slow_rx) = connect(&state, 1);

        fast.handle(register("a")).unwrap();
        slow.handle(register("a")).unwrap();
        drain(&mut fast_rx);

        fast.handle(subscribe("GOOG")).unwrap();

        assert_eq!(state.bindings.len(), 1);
        assert_eq!(state.bindings.stats().total_evicted, 1);
        assert_eq!(drain(&mut fast_rx).len(), 2);
        drop(slow);
    }

    #[test]
    fn test_close_keeps_registry() {
        let state = state();
        let (mut session, _rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        session.handle(subscribe("GOOG")).unwrap();
        drop(session);

        assert!(state.bindings.is_empty());
        assert_eq!(state.registry.get(&Identity::parse("a").unwrap()).len(), 1);
    }

    #[test]
    fn test_malformed_frame() {
        let state = state();
        let (mut session, _rx) = connect(&state, 16);

        let err = session.handle_text("{\"event\":\"subscribe\"").unwrap_err();
        assert!(matches!(err, StreamError::MalformedCommand(_)));

        session
            .handle_text(r#"{"event":"registerUser","email":"a@b.io"}"#)
            .unwrap();
        assert_eq!(session.identity().unwrap().as_str(), "a@b.io");
    }

    #[test]
    fn test_ping_pong() {
        let state = state();
        let (mut session, mut rx) = connect(&state, 16);

        session.handle(ClientCommand::Ping).unwrap();
        assert!(matches!(drain(&mut rx).as_slice(), [WsMessage::Pong { .. }]));
    }

    #[test]
    fn test_subscribe_queued_behind_tick_gets_that_tick() {
        let state = state();
        let goog = state.universe.resolve("GOOG").unwrap();
        let identity = Identity::parse("a").unwrap();
        let (mut session, mut rx) = connect(&state, 16);
        session.handle(register("a")).unwrap();
        drain(&mut rx);

        // Hold the identity lock so the subscribe waits while a full tick runs
        let worker = state.registry.update(&identity, |_| {
            let worker = thread::spawn(move || {
                session.handle(subscribe("GOOG")).unwrap();
                session
            });
            thread::sleep(Duration::from_millis(50));
            state.dispatcher.dispatch(&state.prices.advance());
            worker
        });
        let _session = worker.join().unwrap();

        let current = state.prices.price(&goog).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                WsMessage::Subscribed { symbol: goog.clone() },
                WsMessage::single_price(goog, current),
            ]
        );
    }

    #[test]
    fn test_commands_interleaved_with_ticks_stay_ordered() {
        let state = state();
        let goog = state.universe.resolve("GOOG").unwrap();
        let tsla = state.universe.resolve("TSLA").unwrap();
        let (mut session, mut rx) = connect(&state, 100_000);
        session.handle(register("a")).unwrap();
        session.handle(subscribe("TSLA")).unwrap();
        drain(&mut rx);

        let ticker = {
            let state = state.clone();
            thread::spawn(move || {
                for _ in 0..300 {
                    state.dispatcher.dispatch(&state.prices.advance());
                }
            })
        };
        let commands = thread::spawn(move || {
            for _ in 0..200 {
                session.handle(subscribe("GOOG")).unwrap();
                session.handle(unsubscribe("GOOG")).unwrap();
            }
            session.handle(subscribe("GOOG")).unwrap();
            session
        });
        ticker.join().unwrap();
        let _session = commands.join().unwrap();

        let messages = drain(&mut rx);
        let mut watching = false;
        let mut last_goog = None;
        let mut events = messages.iter();

        while let Some(message) = events.next() {
            match message {
                WsMessage::Subscribed { symbol } => {
                    assert_eq!(symbol, &goog);
                    assert!(!watching);
                    watching = true;

                    // The snapshot follows its confirmation with no tick in between
                    match events.next() {
                        Some(WsMessage::PriceUpdate { prices }) => {
                            assert_eq!(prices.len(), 1);
                            last_goog = Some(prices[&goog]);
                        }
                        other => panic!("expected snapshot, got {:?}", other),
                    }
                }
                WsMessage::Unsubscribed { symbol } => {
                    assert_eq!(symbol, &goog);
                    assert!(watching);
                    watching = false;
                }
                WsMessage::PriceUpdate { prices } => {
                    assert!(prices.contains_key(&tsla));
                    assert_eq!(prices.contains_key(&goog), watching);
                    if let Some(price) = prices.get(&goog) {
                        last_goog = Some(*price);
                    }
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        // Whatever the interleaving, the client ends on the latest price
        assert!(watching);
        assert_eq!(last_goog, state.prices.price(&goog));
    }

    #[test]
    fn test_sibling_sessions_converge_under_concurrency() {
        let state = AppState::with_seed(StreamConfig::default(), 7).unwrap();
        let identity = Identity::parse("shared").unwrap();
        let mut receivers = Vec::new();

        let handles: Vec<_> = ["GOOG", "TSLA", "AMZN", "META", "NVDA"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let (mut session, rx) = connect(&state, 100_000);
                session.handle(register("shared")).unwrap();
                receivers.push(rx);
                thread::spawn(move || {
                    for _ in 0..100 {
                        session.handle(subscribe(name)).unwrap();
                        session.handle(unsubscribe(name)).unwrap();
                    }
                    if i % 2 == 0 {
                        session.handle(subscribe(name)).unwrap();
                    }
                    session
                })
            })
            .collect();

        let sessions: Vec<Session> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let expected: BTreeSet<Symbol> = ["GOOG", "AMZN", "NVDA"]
            .iter()
            .map(|s| state.universe.resolve(s).unwrap())
            .collect();
        assert_eq!(state.registry.get(&identity), expected);

        let bound = state.bindings.bound_to(&identity);
        assert_eq!(bound.len(), sessions.len());
        for binding in bound {
            assert_eq!(*binding.view(), expected);
        }
    }

    #[test]
    fn test_command_latency_merged_on_close() {
        let state = state();
        let (mut session, _rx) = connect(&state, 16);

        session.handle(register("a")).unwrap();
        session.handle(ClientCommand::Ping).unwrap();
        assert_eq!(state.latency.command_stats().sample_count, 0);

        drop(session);
        assert_eq!(state.latency.command_stats().sample_count, 2);
    }
}
