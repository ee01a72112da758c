//! Price Engine Module
//!
//! - `price_engine` - Current prices and the random walk
//! - `ticker` - Periodic driver that advances prices and triggers fan-out

pub mod price_engine;
pub mod ticker;

pub use price_engine::{PriceEngine, PriceUpdate};
pub use ticker::PriceTicker;
