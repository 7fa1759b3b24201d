//! Shared helpers for the integration test suite: a tiny port
//! allocator so parallel `cargo test` binaries don't collide on a
//! fixed `127.0.0.1:PORT` bind.

use std::sync::atomic::{AtomicU16, Ordering};

/// Hands out a fresh loopback endpoint starting at `base`, incrementing
/// by one per call. Each test file uses a `base` at least 50 apart from
/// every other file's so that two binaries running concurrently never
/// pick the same port.
pub fn endpoint(base: u16) -> String {
    static COUNTER: AtomicU16 = AtomicU16::new(0);
    let offset = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("127.0.0.1:{}", base.wrapping_add(offset))
}
