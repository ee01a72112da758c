use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::errors::ConfigError;

/// A tradable ticker from the symbol universe
///
/// Only `SymbolUniverse::resolve` hands these out, so holding a `Symbol`
/// means the ticker is valid. Clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of tradable symbols, built once at startup
#[derive(Debug)]
pub struct SymbolUniverse {
    /// Symbols in configuration order
    symbols: Vec<Symbol>,
    index: HashSet<Symbol>,
}

impl SymbolUniverse {
    /// Build the universe from a configured list
    ///
    /// Rejects an empty list, blank entries and duplicates.
    pub fn new<I, S>(symbols: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered = Vec::new();
        let mut index = HashSet::new();

        for raw in symbols {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                return Err(ConfigError::BlankSymbol);
            }

            let symbol = Symbol(Arc::from(raw));
            if !index.insert(symbol.clone()) {
                return Err(ConfigError::DuplicateSymbol(raw.to_string()));
            }
            ordered.push(symbol);
        }

        if ordered.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }

        Ok(Self {
            symbols: ordered,
            index,
        })
    }

    /// Exact, case-sensitive membership check
    pub fn is_valid(&self, symbol: &str) -> bool {
        self.index.contains(symbol)
    }

    /// Look up the canonical `Symbol` for a raw ticker
    pub fn resolve(&self, symbol: &str) -> Option<Symbol> {
        self.index.get(symbol).cloned()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
