//! A single global stop signal shared by every long-lived task.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the shutdown signal has been triggered.
    pub async fn cancelled(&mut self) {
        if self.is_set() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let (shutdown, mut signal) = Shutdown::new();
        assert!(!signal.is_set());

        shutdown.trigger();
        signal.cancelled().await;
        assert!(signal.is_set());
    }
}
