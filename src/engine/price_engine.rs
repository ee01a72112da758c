//! Price Engine
//!
//! Owns the current price of every symbol and moves them with a bounded
//! random walk. Only the tick scheduler calls `advance()`; everything else
//! takes point-in-time reads.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::PricingConfig;
use crate::errors::ConfigError;
use crate::models::{Symbol, SymbolUniverse};

/// Prices are quoted with two decimal places
const PRICE_SCALE: u32 = 2;

/// Result of one `advance()` call
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    /// Tick sequence number, starting at 1
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    /// Every symbol's new price (all symbols move on every tick)
    pub prices: HashMap<Symbol, Decimal>,
}

// ============================================================================
// Random Walk Parameters (in cents)
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct WalkBounds {
    floor: Decimal,
    step_cents: i64,
    initial_min_cents: i64,
    initial_max_cents: i64,
}

impl WalkBounds {
    fn from_config(pricing: &PricingConfig) -> Result<Self, ConfigError> {
        pricing.validate()?;

        Ok(Self {
            floor: pricing.floor.round_dp(PRICE_SCALE),
            step_cents: to_cents("pricing.max_step", pricing.max_step)?,
            initial_min_cents: to_cents("pricing.initial_min", pricing.initial_min)?,
            initial_max_cents: to_cents("pricing.initial_max", pricing.initial_max)?,
        })
    }

    fn seed(&self, rng: &mut StdRng) -> Decimal {
        let cents = rng.random_range(self.initial_min_cents..self.initial_max_cents);
        Decimal::new(cents, PRICE_SCALE).max(self.floor)
    }

    fn step(&self, price: Decimal, rng: &mut StdRng) -> Decimal {
        let delta = Decimal::new(
            rng.random_range(-self.step_cents..=self.step_cents),
            PRICE_SCALE,
        );
        (price + delta).max(self.floor).round_dp(PRICE_SCALE)
    }
}

fn to_cents(field: &'static str, value: Decimal) -> Result<i64, ConfigError> {
    (value * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| ConfigError::InvalidValue {
            field,
            reason: format!("{} is out of range", value),
        })
}

/// Thread-safe price store with a single writer
pub struct PriceEngine {
    universe: Arc<SymbolUniverse>,
    bounds: WalkBounds,
    prices: RwLock<HashMap<Symbol, Decimal>>,
    rng: Mutex<StdRng>,
    tick: AtomicU64,
}

impl PriceEngine {
    /// Create an engine seeded from OS entropy
    pub fn new(universe: Arc<SymbolUniverse>, pricing: &PricingConfig) -> Result<Self, ConfigError> {
        Self::with_rng(universe, pricing, StdRng::from_os_rng())
    }

    /// Create an engine with a fixed seed (reproducible walks)
    pub fn with_seed(
        universe: Arc<SymbolUniverse>,
        pricing: &PricingConfig,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(universe, pricing, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        universe: Arc<SymbolUniverse>,
        pricing: &PricingConfig,
        mut rng: StdRng,
    ) -> Result<Self, ConfigError> {
        let bounds = WalkBounds::from_config(pricing)?;

        let prices = universe
            .symbols()
            .iter()
            .map(|symbol| (symbol.clone(), bounds.seed(&mut rng)))
            .collect();

        Ok(Self {
            universe,
            bounds,
            prices: RwLock::new(prices),
            rng: Mutex::new(rng),
            tick: AtomicU64::new(0),
        })
    }

    /// Move every price one step and return the new values
    ///
    /// new = max(floor, price + uniform(-max_step, max_step)), two decimals.
    pub fn advance(&self) -> PriceUpdate {
        let mut rng = self.rng.lock();
        let mut prices = self.prices.write();

        // Universe order keeps seeded walks reproducible
        for symbol in self.universe.symbols() {
            if let Some(price) = prices.get_mut(symbol) {
                *price = self.bounds.step(*price, &mut rng);
            }
        }

        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;

        PriceUpdate {
            tick,
            timestamp: Utc::now(),
            prices: prices.clone(),
        }
    }

    /// Consistent read of the requested symbols' prices
    pub fn snapshot<'a, I>(&self, symbols: I) -> BTreeMap<Symbol, Decimal>
    where
        I: IntoIterator<Item = &'a Symbol>,
    {
        let prices = self.prices.read();
        symbols
            .into_iter()
            .filter_map(|symbol| prices.get(symbol).map(|price| (symbol.clone(), *price)))
            .collect()
    }

    /// Consistent read of every price
    pub fn snapshot_all(&self) -> BTreeMap<Symbol, Decimal> {
        self.snapshot(self.universe.symbols())
    }

    pub fn price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    /// Number of ticks applied so far
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn universe(&self) -> &Arc<SymbolUniverse> {
        &self.universe
    }

    #[cfg(test)]
    pub(crate) fn set_price(&self, symbol: &Symbol, price: Decimal) {
        self.prices.write().insert(symbol.clone(), price);
    }
}
