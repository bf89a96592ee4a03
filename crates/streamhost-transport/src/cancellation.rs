use std::sync::Arc;
use tokio::sync::watch;

/// Error returned when awaiting a token whose source has been dropped.
#[derive(Debug, thiserror::Error)]
pub enum CancellationError {
    #[error("cancellation channel closed")]
    ChannelClosed,
}

/// Cloneable token handed to every suspendable operation in the host.
///
/// Backed by a watch channel so any number of tasks can await the same
/// signal; checking is non-blocking, awaiting resolves promptly once the
/// source fires.
#[derive(Clone)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

/// The owning side of a cancellation signal.
#[derive(Clone)]
pub struct CancellationTokenSource {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationTokenSource {
    pub fn new() -> (Self, CancellationToken) {
        let (sender, receiver) = watch::channel(false);
        (
            CancellationTokenSource {
                sender: Arc::new(sender),
            },
            CancellationToken { receiver },
        )
    }

    /// Signals cancellation to every outstanding token.
    pub fn cancel(&self) {
        // Send only fails when all receivers are gone, in which case there
        // is nobody left to unblock.
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Mints another token linked to this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            receiver: self.sender.subscribe(),
        }
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the source cancels. Errors only if the source was
    /// dropped without ever cancelling.
    pub async fn cancelled(&self) -> Result<(), CancellationError> {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return Ok(());
            }
            receiver
                .changed()
                .await
                .map_err(|_| CancellationError::ChannelClosed)?;
        }
    }
}
