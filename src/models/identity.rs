use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::StreamError;

/// Opaque client token that keys a subscription set across reconnects
///
/// Not authenticated here; whatever issued it is trusted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Trim and validate a client-supplied identity
    pub fn parse(raw: &str) -> Result<Self, StreamError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StreamError::EmptyIdentity);
        }
        Ok(Self(Arc::from(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one accepted WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
