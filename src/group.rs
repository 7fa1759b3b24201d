//! Named session groups for targeted broadcast (spec.md §4.8
//! "SessionGroup").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::task::JoinSet;
use tracing::debug;

use crate::session::SessionLike;

/// Map of group name → (session id → session). Empty groups are
/// deleted as soon as their last member leaves (spec.md §3
/// "SessionGroup").
pub struct SessionGroup {
    groups: RwLock<HashMap<String, HashMap<u64, Arc<dyn SessionLike>>>>,
}

impl SessionGroup {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `session` to `name`, creating the group if absent. Also
    /// records the membership on the session itself so its `groups()`
    /// snapshot stays consistent (spec.md §3 "Session's groups set is
    /// kept consistent").
    pub fn add(&self, name: &str, session: Arc<dyn SessionLike>) {
        session.join_group(name);
        self.groups
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(session.id(), session);
    }

    /// Removes a session from `name`; deletes the group entirely if it
    /// becomes empty.
    pub fn remove(&self, name: &str, session_id: u64) {
        let mut groups = self.groups.write().unwrap();
        if let Some(members) = groups.get_mut(name) {
            members.remove(&session_id);
            if members.is_empty() {
                groups.remove(name);
            }
        }
    }

    /// Removes `session` from every group in its own group set
    /// (spec.md §4.8 "remove_from_all"), e.g. on disconnect.
    pub fn remove_from_all(&self, session: &Arc<dyn SessionLike>) {
        for name in session.core().take_all_groups() {
            self.remove(&name, session.id());
        }
    }

    /// Current member count of `name`; 0 if the group does not exist.
    pub fn member_count(&self, name: &str) -> usize {
        self.groups
            .read()
            .unwrap()
            .get(name)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// A snapshot of currently non-empty group names.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }

    /// Sends `data` to every member of `name` except `exclude_id`,
    /// concurrently. A missing group is a no-op (spec.md §4.8).
    pub async fn broadcast(&self, name: &str, data: &[u8], exclude_id: Option<u64>) {
        let members: Vec<Arc<dyn SessionLike>> = match self.groups.read().unwrap().get(name) {
            Some(members) => members.values().cloned().collect(),
            None => return,
        };

        let mut tasks = JoinSet::new();
        for session in members {
            if Some(session.id()) == exclude_id {
                continue;
            }
            let data = data.to_vec();
            tasks.spawn(async move {
                if let Err(err) = session.send(&data).await {
                    debug!(session_id = session.id(), error = %err, "group broadcast send failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

impl Default for SessionGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SendOutcome, SessionCore};
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
    async fn add_then_remove_deletes_empty_group() {
        let group = SessionGroup::new();
        let session = stub_session().await;
        group.add("lobby", session.clone());
        assert_eq!(group.member_count("lobby"), 1);
        assert_eq!(session.groups(), std::collections::HashSet::from(["lobby".to_string()]));

        group.remove("lobby", session.id());
        assert_eq!(group.member_count("lobby"), 0);
        assert!(!group.group_names().contains(&"lobby".to_string()));
    }

    #[tokio::test]
    async fn remove_from_all_clears_every_membership() {
        let group = SessionGroup::new();
        let session = stub_session().await;
        group.add("a", session.clone());
        group.add("b", session.clone());

        let as_dyn: Arc<dyn SessionLike> = session.clone();
        group.remove_from_all(&as_dyn);

        assert_eq!(group.member_count("a"), 0);
        assert_eq!(group.member_count("b"), 0);
        assert!(session.groups().is_empty());
    }

    #[tokio::test]
    async fn broadcast_to_missing_group_is_a_no_op() {
        let group = SessionGroup::new();
        group.broadcast("nope", b"data", None).await;
    }
}
