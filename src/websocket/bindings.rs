//! Connection Binding Table
//!
//! Ephemeral ConnectionId → (Identity, materialized view) mapping. Entries are
//! created on bind and removed on disconnect or eviction; removal never
//! touches the identity's registry entry.

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::messages::WsMessage;
use super::outbound::Outbound;
use crate::errors::DeliveryFailure;
use crate::models::{ConnectionId, Identity, Symbol};

/// A live connection bound to an identity
#[derive(Debug)]
pub struct Binding {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    /// Materialized copy of the identity's subscription set
    view: Mutex<BTreeSet<Symbol>>,
    outbound: Outbound,
}

impl Binding {
    pub fn new(
        connection_id: ConnectionId,
        identity: Identity,
        view: BTreeSet<Symbol>,
        outbound: Outbound,
    ) -> Self {
        Self {
            connection_id,
            identity,
            view: Mutex::new(view),
            outbound,
        }
    }

    /// Lock the view; pushes made while holding it are ordered against ticks
    pub fn view(&self) -> MutexGuard<'_, BTreeSet<Symbol>> {
        self.view.lock()
    }

    pub fn push(&self, message: WsMessage) -> Result<(), DeliveryFailure> {
        self.outbound.push(message)
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}

#[derive(Debug, Default)]
struct Tables {
    by_connection: HashMap<ConnectionId, Arc<Binding>>,
    by_identity: HashMap<Identity, HashSet<ConnectionId>>,
}

/// Counters for the binding table
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct BindingStats {
    /// Currently bound connections
    pub live_connections: usize,
    /// Identities with at least one live connection
    pub live_identities: usize,
    /// Successful binds (lifetime)
    pub total_bound: u64,
    /// Connections removed after a delivery failure (lifetime)
    pub total_evicted: u64,
}

/// Thread-safe binding table
///
/// The lock only covers inserts, removals and cloning the list of bindings;
/// fan-out works on the cloned list.
#[derive(Debug, Default)]
pub struct BindingTable {
    tables: RwLock<Tables>,
    total_bound: AtomicU64,
    total_evicted: AtomicU64,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, binding: Arc<Binding>) {
        let mut tables = self.tables.write();
        tables
            .by_identity
            .entry(binding.identity.clone())
            .or_default()
            .insert(binding.connection_id);
        tables.by_connection.insert(binding.connection_id, binding);
        self.total_bound.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a binding (normal disconnect)
    pub fn remove(&self, connection_id: ConnectionId) -> Option<Arc<Binding>> {
        let mut tables = self.tables.write();
        let binding = tables.by_connection.remove(&connection_id)?;

        if let Some(siblings) = tables.by_identity.get_mut(&binding.identity) {
            siblings.remove(&connection_id);
            if siblings.is_empty() {
                tables.by_identity.remove(&binding.identity);
            }
        }

        Some(binding)
    }

    /// Remove a binding after a delivery failure and close its connection
    pub fn evict(&self, connection_id: ConnectionId, reason: DeliveryFailure) -> bool {
        match self.remove(connection_id) {
            Some(binding) => {
                binding.outbound().close();
                self.total_evicted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "🔌 Evicted connection {} ({}): {}",
                    connection_id, binding.identity, reason
                );
                true
            }
            None => {
                debug!("Connection {} already removed", connection_id);
                false
            }
        }
    }

    /// Clone of every live binding, taken under one read lock
    pub fn snapshot(&self) -> Vec<Arc<Binding>> {
        self.tables.read().by_connection.values().cloned().collect()
    }

    /// Live bindings for one identity
    pub fn bound_to(&self, identity: &Identity) -> Vec<Arc<Binding>> {
        let tables = self.tables.read();
        tables
            .by_identity
            .get(identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.by_connection.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BindingStats {
        let tables = self.tables.read();
        BindingStats {
            live_connections: tables.by_connection.len(),
            live_identities: tables.by_identity.len(),
            total_bound: self.total_bound.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
        }
    }
}
