//! A tiny cancellation primitive shared by accept loops, read loops and
//! heartbeats (spec.md §5 "Cancellation").

use tokio::sync::watch;

/// Owned by whoever calls `start`/`connect`; triggering it cancels
/// every [`Shutdown`] handle derived from it.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// A cheaply-cloneable cancellation signal observers can poll or await.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new().0
    }
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle has been cancelled. A no-op future
    /// that never resolves if the handle was dropped without firing
    /// would be wrong here, so this awaits the watch channel directly.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
