//! Error types for the streaming engine
//!
//! `StreamError` covers everything a connection can run into while it is
//! alive. `ConfigError` is only produced at startup and is fatal there.
//!
//! # Error Categories
//!
//! - **Protocol Misuse**: `NotBound`, `AlreadyBound`, `EmptyIdentity`, `MalformedCommand`
//! - **Invalid Symbol**: `UnknownSymbol`
//! - **Delivery**: `DeliveryFailed`
//! - **Lookup**: `IdentityNotFound` (HTTP only)

use thiserror::Error;

use crate::models::{ConnectionId, Identity};

/// Why a push to a connection's outbound queue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The bounded queue is full; the client is not draining fast enough
    Lagging,
    /// The writer side is gone or the connection was already evicted
    Closed,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Lagging => write!(f, "outbound queue full"),
            DeliveryFailure::Closed => write!(f, "connection closed"),
        }
    }
}

/// Errors raised while handling a connection's commands or deliveries
#[derive(Debug, Error)]
pub enum StreamError {
    /// A subscribe/unsubscribe arrived before `registerIdentity`
    #[error("Connection {0} is not bound to an identity")]
    NotBound(ConnectionId),

    /// `registerIdentity` was sent twice on the same connection
    #[error("Connection {connection_id} is already bound to {identity}")]
    AlreadyBound {
        connection_id: ConnectionId,
        identity: Identity,
    },

    /// Identity string was empty after trimming
    #[error("Identity must not be empty")]
    EmptyIdentity,

    /// Inbound frame could not be decoded as a command
    #[error("Malformed command: {0}")]
    MalformedCommand(#[from] serde_json::Error),

    /// The symbol is not part of the configured universe
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The identity has never logged in or bound
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// Writing to the connection's outbound queue failed
    #[error("Delivery to connection {connection_id} failed: {reason}")]
    DeliveryFailed {
        connection_id: ConnectionId,
        reason: DeliveryFailure,
    },
}

impl StreamError {
    /// Returns true for client mistakes that are logged and then dropped
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            StreamError::NotBound(_)
                | StreamError::AlreadyBound { .. }
                | StreamError::EmptyIdentity
                | StreamError::MalformedCommand(_)
        )
    }

    /// Returns true if the connection should be torn down
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, StreamError::DeliveryFailed { .. })
    }
}

/// Invalid startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Symbol universe must contain at least one symbol")]
    EmptyUniverse,

    #[error("Blank symbol in universe")]
    BlankSymbol,

    #[error("Duplicate symbol in universe: {0}")]
    DuplicateSymbol(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
