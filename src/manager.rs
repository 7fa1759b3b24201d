//! Thread-safe id→session map with broadcast and close-all (spec.md
//! §4.8 "SessionManager").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::task::JoinSet;
use tracing::debug;

use crate::session::SessionLike;

/// Concurrent map from session id to session. Iteration (broadcast,
/// close_all) operates on a snapshot so it is safe against concurrent
/// mutation (spec.md §5 "Concurrency across sessions").
pub struct SessionManager {
    sessions: RwLock<HashMap<u64, Arc<dyn SessionLike>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts `session`. Fails (returns `false`) if its id is already
    /// present — ids come from a single process-wide counter, so this
    /// is essentially unreachable, but `try_add` is the documented
    /// contract (spec.md §4.8).
    pub fn try_add(&self, session: Arc<dyn SessionLike>) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&session.id()) {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    pub fn try_remove(&self, id: u64) -> Option<Arc<dyn SessionLike>> {
        self.sessions.write().unwrap().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<dyn SessionLike>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// A snapshot of all current sessions, safe to iterate while other
    /// tasks insert/remove concurrently.
    pub fn snapshot(&self) -> Vec<Arc<dyn SessionLike>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Sends `data` to every session except `exclude_id`, concurrently
    /// — one per session, so one session's suspension never blocks
    /// another (spec.md §5). Per-session failures are swallowed
    /// (spec.md §7 "Broadcast and close-all swallow per-session
    /// errors").
    pub async fn broadcast(&self, data: &[u8], exclude_id: Option<u64>) {
        let mut tasks = JoinSet::new();
        for session in self.snapshot() {
            if Some(session.id()) == exclude_id {
                continue;
            }
            let data = data.to_vec();
            tasks.spawn(async move {
                if let Err(err) = session.send(&data).await {
                    debug!(session_id = session.id(), error = %err, "broadcast send failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Closes every session concurrently, swallowing per-session
    /// errors, then clears the map (spec.md §4.8).
    pub async fn close_all(&self) {
        let mut tasks = JoinSet::new();
        for session in self.snapshot() {
            tasks.spawn(async move {
                if let Err(err) = session.close().await {
                    debug!(session_id = session.id(), error = %err, "close_all: session close failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        self.sessions.write().unwrap().clear();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SendOutcome, SessionCore, SessionState};
    use crate::transport::{PendingIo, Transport, TransportConfig};
    use std::future::Future;
    use std::pin::Pin;
    use tokio::net::{TcpListener, TcpStream};

    struct StubSession {
        core: SessionCore,
    }

    impl SessionLike for StubSession {
        fn core(&self) -> &SessionCore {
            &self.core
        }

        fn send<'a>(
            &'a self,
            data: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = Result<SendOutcome, crate::error::StormError>> + Send + 'a>>
        {
            Box::pin(async move { self.core.guarded_write(data).await })
        }

        fn close<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<(), crate::error::StormError>> + Send + 'a>> {
            Box::pin(self.core.close_once(|| async { Ok(()) }))
        }
    }

    async fn stub_session() -> Arc<StubSession> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accept, connect) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (stream, remote) = accept.unwrap();
        let _ = connect.unwrap();
        let transport = Transport::new(
            PendingIo::Plain(stream),
            Some(remote),
            TransportConfig::default(),
            None,
        );
        transport.handshake().await.unwrap();
        Arc::new(StubSession {
            core: SessionCore::new(Arc::new(transport), crate::session::SlowConsumerPolicy::Wait),
        })
    }

    #[tokio::test]
    async fn add_get_remove_round_trip() {
        let manager = SessionManager::new();
        let session = stub_session().await;
        let id = session.id();
        assert!(manager.try_add(session.clone()));
        assert!(!manager.try_add(session.clone()));
        assert!(manager.get(id).is_some());
        assert_eq!(manager.count(), 1);
        assert!(manager.try_remove(id).is_some());
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn close_all_closes_every_session_and_clears_map() {
        let manager = SessionManager::new();
        let a = stub_session().await;
        let b = stub_session().await;
        manager.try_add(a.clone());
        manager.try_add(b.clone());

        manager.close_all().await;

        assert_eq!(manager.count(), 0);
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn broadcast_excludes_given_id() {
        let manager = SessionManager::new();
        let a = stub_session().await;
        let b = stub_session().await;
        let a_id = a.id();
        manager.try_add(a.clone());
        manager.try_add(b.clone());

        manager.broadcast(b"hi", Some(a_id)).await;

        assert_eq!(a.metrics().bytes_sent, 0);
        assert_eq!(b.metrics().bytes_sent, 2);
    }
}
