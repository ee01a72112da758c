pub mod identity;
pub mod symbol;

pub use identity::{ConnectionId, Identity};
pub use symbol::{Symbol, SymbolUniverse};
