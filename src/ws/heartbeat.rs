//! Ping/pong liveness timer (spec.md §4.6).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::ws::frame::WsFrame;

/// Periodic ping timer with a missed-pong counter. An interval of zero
/// disables the heartbeat entirely: `start` becomes a no-op and no
/// timer task is spawned.
pub struct Heartbeat {
    missed_pongs: Arc<AtomicU32>,
    shutdown: Option<ShutdownHandle>,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            missed_pongs: Arc::new(AtomicU32::new(0)),
            shutdown: None,
            task: None,
        }
    }

    /// Resets the missed-pong counter. Called when a Pong frame
    /// arrives from the peer.
    pub fn on_pong_received(&self) {
        self.missed_pongs.store(0, Ordering::SeqCst);
    }

    /// Starts the timer task. `send_ping` writes a Ping frame (masked
    /// for clients, unmasked for servers — the caller decides);
    /// `on_timeout` is invoked once `missed_pongs` exceeds
    /// `max_missed_pongs`, after which the timer stops itself.
    pub fn start<S, T>(
        &mut self,
        ping_interval: Duration,
        max_missed_pongs: u32,
        send_ping: S,
        on_timeout: T,
    ) where
        S: Fn(WsFrame) + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
    {
        if ping_interval.is_zero() {
            return;
        }

        let (handle, mut shutdown) = ShutdownHandle::new();
        let missed_pongs = self.missed_pongs.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_cancelled(&mut shutdown) => return,
                    _ = ticker.tick() => {}
                }

                let count = missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
                if count > max_missed_pongs {
                    on_timeout();
                    return;
                }
                send_ping(WsFrame::ping(Vec::new()));
            }
        });

        self.shutdown = Some(handle);
        self.task = Some(task);
    }

    /// Cancels the timer and joins its task. Safe to call when the
    /// heartbeat was never started (interval 0, or `start` not yet
    /// called).
    pub async fn dispose(&mut self) {
        if let Some(handle) = self.shutdown.take() {
            handle.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Signals the timer to stop without waiting for its task to exit.
    /// Used by abrupt teardown paths that cannot `.await` (spec.md §9
    /// "the heartbeat's `on_timeout`... is disposed with the session").
    pub fn cancel_without_joining(&mut self) {
        if let Some(handle) = self.shutdown.take() {
            handle.cancel();
        }
    }
}

async fn shutdown_cancelled(shutdown: &mut Shutdown) {
    shutdown.cancelled().await
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn zero_interval_never_starts_a_task() {
        let mut hb = Heartbeat::new();
        hb.start(Duration::ZERO, 3, |_| {}, || {});
        assert!(hb.task.is_none());
        hb.dispose().await;
    }

    #[tokio::test]
    async fn timeout_fires_after_max_missed_pongs() {
        let pings = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let pings2 = pings.clone();
        let timeouts2 = timeouts.clone();

        let mut hb = Heartbeat::new();
        hb.start(
            Duration::from_millis(5),
            1,
            move |_| {
                pings2.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                timeouts2.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        hb.dispose().await;

        assert!(pings.load(Ordering::SeqCst) >= 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pong_received_resets_counter_and_avoids_timeout() {
        let timeouts = Arc::new(AtomicUsize::new(0));
        let timeouts2 = timeouts.clone();

        let mut hb = Heartbeat::new();
        hb.start(
            Duration::from_millis(5),
            1,
            |_| {},
            move || {
                timeouts2.fetch_add(1, Ordering::SeqCst);
            },
        );

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(4)).await;
            hb.on_pong_received();
        }
        hb.dispose().await;

        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }
}
