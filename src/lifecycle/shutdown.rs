//! Shutdown and cancellation signalling.

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Background tasks and suspended callers subscribe to it. The signal is
/// level-triggered: a subscriber created after [`Shutdown::trigger`] still
/// observes it, so a late waiter never sleeps past a shutdown.
///
/// The same type serves as a per-call cancellation source; see
/// [`Cancellation`](crate::lifecycle::Cancellation).
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Get the number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until the signal is triggered.
    ///
    /// If the owning [`Shutdown`] is dropped without triggering, this never
    /// resolves: nobody is left who could cancel.
    pub async fn recv(&mut self) {
        let triggered = self.rx.wait_for(|fired| *fired).await.is_ok();
        if !triggered {
            std::future::pending::<()>().await;
        }
    }

    /// Whether the signal has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
