//! Process-wide monotonic session identifiers.
//!
//! Ids start at 1 and are strictly increasing for the lifetime of the
//! process; they are never reused and do not survive a restart (see
//! spec.md §3 and §6 "Persisted state: none").

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next session id.
pub fn next_session_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase() {
        let a = next_session_id();
        let b = next_session_id();
        let c = next_session_id();
        assert!(b > a);
        assert!(c > b);
    }
}
