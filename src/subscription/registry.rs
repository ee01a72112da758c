use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{Identity, Symbol};

/// One identity's subscribed symbols
///
/// The mutex serializes every mutation for this identity, including the
/// read taken when a connection binds.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: Mutex<BTreeSet<Symbol>>,
}

impl SubscriptionSet {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<Symbol>> {
        self.symbols.lock()
    }

    pub fn snapshot(&self) -> BTreeSet<Symbol> {
        self.symbols.lock().clone()
    }
}

/// Process-lifetime mapping from identity to subscription set
///
/// Survives connection churn: nothing here is removed on disconnect.
/// Shard locks are only held long enough to clone an entry's `Arc`, so
/// different identities never wait on each other.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    sets: DashMap<Identity, Arc<SubscriptionSet>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the identity's set, creating an empty one if absent
    pub fn ensure(&self, identity: &Identity) -> Arc<SubscriptionSet> {
        if let Some(existing) = self.sets.get(identity) {
            return Arc::clone(existing.value());
        }

        let entry = self.sets.entry(identity.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// Run `f` on the identity's set while holding its lock
    ///
    /// Creates the set if absent. Every mutation goes through here, so
    /// changes to one identity are serialized together with whatever `f`
    /// does under the lock (bootstrap reads, view propagation).
    pub fn update<R, F>(&self, identity: &Identity, f: F) -> R
    where
        F: FnOnce(&mut BTreeSet<Symbol>) -> R,
    {
        let set = self.ensure(identity);
        let mut symbols = set.lock();
        f(&mut symbols)
    }

    /// Insert a symbol; returns false if it was already present
    pub fn add(&self, identity: &Identity, symbol: &Symbol) -> bool {
        self.update(identity, |symbols| symbols.insert(symbol.clone()))
    }

    /// Remove a symbol; returns false if it was absent
    ///
    /// Identities are never dropped, so an absent one stays absent.
    pub fn remove(&self, identity: &Identity, symbol: &Symbol) -> bool {
        if !self.contains_identity(identity) {
            return false;
        }
        self.update(identity, |symbols| symbols.remove(symbol))
    }

    /// Point-in-time read; unknown identities read as empty and are not created
    pub fn get(&self, identity: &Identity) -> BTreeSet<Symbol> {
        self.lookup(identity)
            .map(|set| set.snapshot())
            .unwrap_or_default()
    }

    pub fn contains_identity(&self, identity: &Identity) -> bool {
        self.sets.contains_key(identity)
    }

    pub fn identity_count(&self) -> usize {
        self.sets.len()
    }

    fn lookup(&self, identity: &Identity) -> Option<Arc<SubscriptionSet>> {
        self.sets.get(identity).map(|entry| Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolUniverse;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::thread;

    fn universe() -> SymbolUniverse {
        SymbolUniverse::new(["GOOG", "TSLA", "AMZN", "META", "NVDA"]).unwrap()
    }

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let alice = id("alice@example.com");

        let first = registry.ensure(&alice);
        let second = registry.ensure(&alice);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.identity_count(), 1);
        assert!(registry.get(&alice).is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let universe = universe();
        let registry = SubscriptionRegistry::new();
        let alice = id("alice@example.com");
        let goog = universe.resolve("GOOG").unwrap();

        assert!(registry.add(&alice, &goog));
        assert!(!registry.add(&alice, &goog));
        assert_eq!(registry.get(&alice).len(), 1);

        assert!(registry.remove(&alice, &goog));
        assert!(!registry.remove(&alice, &goog));
        assert!(registry.get(&alice).is_empty());
        assert!(registry.contains_identity(&alice));
    }

    #[test]
    fn test_update_returns_closure_result() {
        let universe = universe();
        let registry = SubscriptionRegistry::new();
        let alice = id("alice");
        let goog = universe.resolve("GOOG").unwrap();

        let (inserted, size) = registry.update(&alice, |symbols| {
            let inserted = symbols.insert(goog.clone());
            (inserted, symbols.len())
        });

        assert!(inserted);
        assert_eq!(size, 1);
        assert!(registry.get(&alice).contains(&goog));
    }

    #[test]
    fn test_unknown_identity_reads_empty_without_creating() {
        let universe = universe();
        let registry = SubscriptionRegistry::new();
        let ghost = id("ghost");

        assert!(registry.get(&ghost).is_empty());
        assert!(!registry.remove(&ghost, &universe.resolve("TSLA").unwrap()));
        assert!(!registry.contains_identity(&ghost));
        assert_eq!(registry.identity_count(), 0);
    }

    #[test]
    fn test_concurrent_identities_match_sequential_fold() {
        let universe = Arc::new(universe());
        let registry = Arc::new(SubscriptionRegistry::new());

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let universe = Arc::clone(&universe);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let identity = id(&format!("user{}", worker));
                    let mut rng = StdRng::seed_from_u64(worker);
                    let mut expected = BTreeSet::new();

                    for _ in 0..500 {
                        let symbol = universe.symbols()[rng.random_range(0..universe.len())].clone();
                        if rng.random_bool(0.6) {
                            registry.add(&identity, &symbol);
                            expected.insert(symbol);
                        } else {
                            registry.remove(&identity, &symbol);
                            expected.remove(&symbol);
                        }
                    }

                    (identity, expected)
                })
            })
            .collect();

        for handle in handles {
            let (identity, expected) = handle.join().unwrap();
            assert_eq!(registry.get(&identity), expected);
        }
        assert_eq!(registry.identity_count(), 8);
    }

    #[test]
    fn test_same_identity_no_lost_updates() {
        let universe = Arc::new(universe());
        let registry = Arc::new(SubscriptionRegistry::new());
        let shared = id("shared");

        // Each thread owns one symbol and ends with it subscribed
        let handles: Vec<_> = universe
            .symbols()
            .iter()
            .cloned()
            .map(|symbol| {
                let registry = Arc::clone(&registry);
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        registry.add(&shared, &symbol);
                        registry.remove(&shared, &symbol);
                    }
                    registry.add(&shared, &symbol);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let expected: BTreeSet<Symbol> = universe.symbols().iter().cloned().collect();
        assert_eq!(registry.get(&shared), expected);
    }
}
