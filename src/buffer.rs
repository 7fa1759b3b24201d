//! Bounded byte buffer implementing kernel-like backpressure with
//! pause/resume hysteresis (spec.md §4.1 "Bounded buffers").
//!
//! A [`PressureBuffer`] sits between a producer (the side appending
//! bytes) and a consumer (the side draining them). Once the buffer's
//! length reaches `pause_at`, the producer suspends on its next
//! `push` until the consumer has drained the buffer back down to
//! `resume_at` (half of `pause_at`). A `pause_at` of zero means
//! unlimited — not recommended, per spec, but supported.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::StormError;

struct State {
    data: VecDeque<u8>,
    closed: bool,
}

pub struct PressureBuffer {
    state: Mutex<State>,
    not_full: Notify,
    not_empty: Notify,
    pause_at: usize,
    resume_at: usize,
}

impl PressureBuffer {
    /// `pause_at_bytes == 0` disables the bound entirely.
    pub fn new(pause_at_bytes: usize) -> Self {
        Self {
            state: Mutex::new(State {
                data: VecDeque::new(),
                closed: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            pause_at: pause_at_bytes,
            resume_at: pause_at_bytes / 2,
        }
    }

    fn bounded(&self) -> bool {
        self.pause_at > 0
    }

    /// Appends `data`, suspending first if the buffer is currently at
    /// or above the pause threshold. Returns `true` if the call had to
    /// suspend (i.e. backpressure was observed).
    pub async fn push(&self, data: &[u8]) -> Result<bool, StormError> {
        let mut waited = false;
        loop {
            // Register interest before re-checking state: `Notify`
            // only wakes tasks already polling `notified()`, so the
            // future must exist before we can observe a stale "full"
            // reading without risking a missed wakeup from a `pop`
            // that drains and notifies in between.
            let full = self.not_full.notified();
            tokio::pin!(full);
            full.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return Err(StormError::Transport(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "buffer closed",
                    )));
                }
                if !self.bounded() || state.data.len() < self.pause_at {
                    state.data.extend(data.iter().copied());
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(waited);
                }
            }
            waited = true;
            full.await;
        }
    }

    /// Removes up to `max` bytes, suspending until at least one byte
    /// is available or the buffer is closed (in which case an empty
    /// vec signals EOF).
    pub async fn pop(&self, max: usize) -> Vec<u8> {
        loop {
            let empty = self.not_empty.notified();
            tokio::pin!(empty);
            empty.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if !state.data.is_empty() {
                    let n = max.min(state.data.len());
                    let out: Vec<u8> = state.data.drain(..n).collect();
                    let len_after = state.data.len();
                    drop(state);
                    if !self.bounded() || len_after <= self.resume_at {
                        self.not_full.notify_waiters();
                    }
                    return out;
                }
                if state.closed {
                    return Vec::new();
                }
            }
            empty.await;
        }
    }

    /// Marks the buffer closed: any suspended `push`/`pop` wakes and
    /// `pop` starts returning empty vectors (EOF).
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the buffer sits at or above its pause threshold.
    pub fn is_backpressured(&self) -> bool {
        self.bounded() && self.len() >= self.pause_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_pop_roundtrip() {
        let buf = PressureBuffer::new(0);
        buf.push(b"hello").await.unwrap();
        let out = buf.pop(1024).await;
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn push_suspends_past_pause_threshold() {
        let buf = Arc::new(PressureBuffer::new(10));
        buf.push(&[0u8; 10]).await.unwrap();
        assert!(buf.is_backpressured());

        let buf2 = buf.clone();
        let handle = tokio::spawn(async move { buf2.push(&[1u8; 1]).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        // Draining below resume_at (5) should release the waiting push.
        let _ = buf.pop(6).await;
        let waited = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("push should resume after drain")
            .unwrap();
        assert!(waited);
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_eof() {
        let buf = Arc::new(PressureBuffer::new(0));
        let buf2 = buf.clone();
        let handle = tokio::spawn(async move { buf2.pop(16).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.close();
        let out = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(out.is_empty());
    }
}
