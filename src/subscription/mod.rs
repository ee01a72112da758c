//! Subscription Registry Module
//!
//! Durable (process-lifetime) identity → symbol-set mapping, keyed by the
//! client's identity rather than its connection.

pub mod registry;

pub use registry::{SubscriptionRegistry, SubscriptionSet};
