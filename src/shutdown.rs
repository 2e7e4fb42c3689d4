//! Process-wide shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Trigger side of the shutdown signal.
///
/// Cloned freely; every component that needs to stop holds a
/// [`ShutdownSignal`] obtained from [`Shutdown::subscribe`].
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signals every subscriber. Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered, or immediately if it already was.
    pub async fn wait(&mut self) {
        // A dropped trigger side also means nobody will keep us running
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
