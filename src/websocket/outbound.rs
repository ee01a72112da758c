use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::messages::WsMessage;
use crate::errors::DeliveryFailure;

/// Write side of one connection
///
/// Pushes never block: a full queue means the client is lagging, and the
/// caller decides to evict. Cancelling `closed` tells the socket tasks to
/// shut down.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<WsMessage>,
    closed: CancellationToken,
}

impl Outbound {
    /// Create a bounded outbound queue; the receiver feeds the socket writer
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Queue a message without waiting
    pub fn push(&self, message: WsMessage) -> Result<(), DeliveryFailure> {
        if self.closed.is_cancelled() {
            return Err(DeliveryFailure::Closed);
        }

        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Lagging,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Signal the connection's tasks to stop
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled when the connection is closed or evicted
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
