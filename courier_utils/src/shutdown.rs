use std::{future::pending, time::Duration};
use tokio::sync::watch;

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Cooperative shutdown flag, checked between units of work.
///
/// It never interrupts a call in flight; only [`Shutdown::sleep`] returns early.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown(rx))
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested before or during the
    /// sleep.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }
        let mut rx = self.0.clone();
        let requested = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // trigger dropped, the flag can no longer change
                    pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = requested => false,
        }
    }
}
