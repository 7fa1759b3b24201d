//! Ordered middleware pipeline (spec.md §4.9).

use std::sync::Arc;

use crate::error::StormError;
use crate::session::SessionLike;

/// A single interceptor. Any subset of methods may be implemented;
/// defaults are no-ops / pass-through.
pub trait Middleware: Send + Sync {
    fn on_connected(&self, _session: &Arc<dyn SessionLike>) {}

    /// Forward-order hook on inbound data. An empty result stops
    /// forwarding and drops the message (spec.md §4.9).
    fn on_data_received(&self, _session: &Arc<dyn SessionLike>, data: Vec<u8>) -> Vec<u8> {
        data
    }

    /// Forward-order hook on outbound data. An empty result drops the
    /// send.
    fn on_data_sending(&self, _session: &Arc<dyn SessionLike>, data: Vec<u8>) -> Vec<u8> {
        data
    }

    /// Reverse-order hook, mirroring stack unwinding (spec.md §4.9).
    fn on_disconnected(&self, _session: &Arc<dyn SessionLike>) {}

    fn on_error(&self, _session: &Arc<dyn SessionLike>, _error: &StormError) {}
}

/// An ordered, immutable-after-registration list of [`Middleware`]
/// (spec.md §4.9: "immutable after registration from the server's
/// perspective; middleware is registered before `start`").
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        self.stages.push(middleware);
    }

    pub fn on_connected(&self, session: &Arc<dyn SessionLike>) {
        for stage in &self.stages {
            stage.on_connected(session);
        }
    }

    /// Runs the forward-order receive pipeline. Returns `None` if any
    /// stage drops the message by returning empty data.
    pub fn on_data_received(&self, session: &Arc<dyn SessionLike>, data: Vec<u8>) -> Option<Vec<u8>> {
        let mut data = data;
        for stage in &self.stages {
            data = stage.on_data_received(session, data);
            if data.is_empty() {
                return None;
            }
        }
        Some(data)
    }

    /// Runs the forward-order send pipeline. Returns `None` if any
    /// stage drops the send.
    pub fn on_data_sending(&self, session: &Arc<dyn SessionLike>, data: Vec<u8>) -> Option<Vec<u8>> {
        let mut data = data;
        for stage in &self.stages {
            data = stage.on_data_sending(session, data);
            if data.is_empty() {
                return None;
            }
        }
        Some(data)
    }

    /// Runs the reverse-order disconnect pipeline, mirroring stack
    /// unwinding (spec.md §4.9).
    pub fn on_disconnected(&self, session: &Arc<dyn SessionLike>) {
        for stage in self.stages.iter().rev() {
            stage.on_disconnected(session);
        }
    }

    pub fn on_error(&self, session: &Arc<dyn SessionLike>, error: &StormError) {
        for stage in &self.stages {
            stage.on_error(session, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SendOutcome, SessionCore};
    use crate::transport::{PendingIo, Transport, TransportConfig};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
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
        ) -> Pin<Box<dyn Future<Output = Result<SendOutcome, StormError>> + Send + 'a>> {
            Box::pin(async move { self.core.guarded_write(data).await })
        }

        fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StormError>> + Send + 'a>> {
            Box::pin(self.core.close_once(|| async { Ok(()) }))
        }
    }

    async fn stub_session() -> Arc<dyn SessionLike> {
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

    struct RecordingMiddleware {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for RecordingMiddleware {
        fn on_connected(&self, _session: &Arc<dyn SessionLike>) {
            self.order.lock().unwrap().push(self.name);
        }

        fn on_disconnected(&self, _session: &Arc<dyn SessionLike>) {
            self.order.lock().unwrap().push(self.name);
        }
    }

    struct UppercaseMiddleware;

    impl Middleware for UppercaseMiddleware {
        fn on_data_received(&self, _session: &Arc<dyn SessionLike>, data: Vec<u8>) -> Vec<u8> {
            data.to_ascii_uppercase()
        }
    }

    struct DropEverythingMiddleware;

    impl Middleware for DropEverythingMiddleware {
        fn on_data_received(&self, _session: &Arc<dyn SessionLike>, _data: Vec<u8>) -> Vec<u8> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn connect_runs_forward_disconnect_runs_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(RecordingMiddleware { name: "a", order: order.clone() }));
        pipeline.register(Arc::new(RecordingMiddleware { name: "b", order: order.clone() }));

        let session = stub_session().await;
        pipeline.on_connected(&session);
        pipeline.on_disconnected(&session);

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "b", "a"]);
    }

    #[tokio::test]
    async fn receive_pipeline_transforms_data() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(UppercaseMiddleware));
        let session = stub_session().await;
        let result = pipeline.on_data_received(&session, b"hello".to_vec());
        assert_eq!(result, Some(b"HELLO".to_vec()));
    }

    #[tokio::test]
    async fn empty_result_drops_the_message() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(DropEverythingMiddleware));
        let session = stub_session().await;
        let result = pipeline.on_data_received(&session, b"hello".to_vec());
        assert_eq!(result, None);
    }
}
