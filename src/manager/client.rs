//! Controller-side client for the manager interface.
//!
//! One connection multiplexes any number of outstanding calls. A writer
//! task drains queued requests into the framed sink; a reader task matches
//! replies to calls by correlation id and completes each call once.
//! Dropping the client stops both tasks and closes the connection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use super::{ManagerInterface, PendingReply, ReplySender, RpcError, settle};
use crate::accessibility::Pid;
use crate::ipc::{BundleIdRequest, ClientCodec, HealthReply, HealthRequest, Reply, Request};

/// An outstanding call, waiting for the reply kind it was issued for.
enum Call {
    BundleId(ReplySender),
    Health(oneshot::Sender<Result<HealthReply, RpcError>>),
}

impl Call {
    fn fail(self, error: RpcError) {
        match self {
            Self::BundleId(tx) => {
                tx.send(Err(error));
            }
            Self::Health(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

/// In-flight call table, closed once the connection is gone.
#[derive(Default)]
struct Calls {
    pending: HashMap<u64, Call>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Calls>,
    next_id: AtomicU64,
    violations: AtomicU64,
}

impl Shared {
    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn violation(&self, id: u64, reason: &str) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(id, reason, "agent broke the reply contract");
    }

    fn dispatch(&self, reply: Reply) {
        let id = reply.id();
        let Some(call) = self.calls().pending.remove(&id) else {
            self.violation(id, "reply for unknown or already-answered call");
            return;
        };

        match (call, reply) {
            (Call::BundleId(tx), Reply::BundleId(reply)) => {
                let outcome = settle(reply);
                if let Err(RpcError::ContractViolation(reason)) = &outcome {
                    self.violation(id, reason);
                }
                if !tx.send(outcome) {
                    tracing::debug!(id, "caller discarded reply");
                }
            }
            (Call::Health(tx), Reply::Health(health)) => {
                let _ = tx.send(Ok(health));
            }
            (call, _) => {
                let reason = "reply kind does not match the call";
                self.violation(id, reason);
                call.fail(RpcError::ContractViolation(reason.into()));
            }
        }
    }

    /// Fail every outstanding call and refuse new ones.
    fn close(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut calls = self.calls();
            calls.closed = true;
            calls.pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "failing outstanding calls");
        }
        for (_, call) in drained {
            call.fail(RpcError::Transport(reason.to_string()));
        }
    }
}

/// [`ManagerInterface`] over a framed byte stream to the agent.
///
/// Construct inside a Tokio runtime; the I/O tasks are spawned on it and
/// end when the connection closes or the client is dropped.
pub struct ManagerClient {
    outbound: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
    /// Fired on drop to stop the reader task.
    shutdown: Option<oneshot::Sender<()>>,
}

impl ManagerClient {
    /// Dial the agent's Unix socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| RpcError::Transport(format!("connect {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "connected to agent");
        Ok(Self::new(stream))
    }

    /// Run the client over an already-established transport.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut sink, mut stream) = Framed::new(io, ClientCodec::new()).split();
        let (outbound, mut queued) = mpsc::unbounded_channel::<Request>();
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let shared = Arc::new(Shared::default());

        let writer_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(request) = queued.recv().await {
                let id = request.id();
                if let Err(e) = sink.send(request).await {
                    tracing::warn!(id, error = %e, "failed to send request");
                    writer_shared.close("connection write failed");
                    return;
                }
            }
            // Client dropped: shut down our write half so the agent sees EOF.
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "closing request stream failed");
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = &mut stop => break "client dropped",
                    frame = stream.next() => match frame {
                        Some(Ok(reply)) => reader_shared.dispatch(reply),
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "undecodable reply, dropping connection");
                            break "undecodable reply";
                        }
                        None => break "connection closed",
                    },
                }
            };
            reader_shared.close(reason);
        });

        Self {
            outbound,
            shared,
            shutdown: Some(shutdown),
        }
    }

    /// Check that the agent is serving. Resolves to the agent's health
    /// report, whatever its status.
    pub async fn health(&self) -> Result<HealthReply, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Call::Health(tx), |id| Request::Health(HealthRequest { id }));
        rx.await
            .unwrap_or_else(|_| Err(RpcError::Transport("call dropped without a reply".into())))
    }

    /// Replies that could not be matched to exactly one call, plus replies
    /// that broke the reply contract.
    pub fn contract_violations(&self) -> u64 {
        self.shared.violations.load(Ordering::Relaxed)
    }

    /// Calls still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.shared.calls().pending.len()
    }

    /// Register `call` under a fresh id and queue its request.
    fn submit(&self, call: Call, request: impl FnOnce(u64) -> Request) -> u64 {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut calls = self.shared.calls();
            if calls.closed {
                drop(calls);
                call.fail(RpcError::Transport("connection closed".into()));
                return id;
            }
            calls.pending.insert(id, call);
        }

        if self.outbound.send(request(id)).is_err() {
            if let Some(call) = self.shared.calls().pending.remove(&id) {
                call.fail(RpcError::Transport("connection closed".into()));
            }
        }
        id
    }
}

impl Drop for ManagerClient {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl ManagerInterface for ManagerClient {
    fn request_bundle_id(&self, pid: Pid) -> PendingReply {
        let (tx, reply) = PendingReply::channel();
        let id = self.submit(Call::BundleId(tx), |id| {
            Request::BundleId(BundleIdRequest { id, pid })
        });
        tracing::debug!(id, pid, "bundle id requested");
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{AgentCodec, AgentError, BundleIdReply};
    use tokio::io::DuplexStream;
    use tokio::time::{Duration, timeout};

    type AgentSide = Framed<DuplexStream, AgentCodec>;

    fn pair() -> (ManagerClient, AgentSide) {
        let (a, b) = tokio::io::duplex(4096);
        (ManagerClient::new(a), Framed::new(b, AgentCodec::new()))
    }

    async fn next_request(agent: &mut AgentSide) -> Request {
        agent.next().await.unwrap().unwrap()
    }

    async fn next_bundle_request(agent: &mut AgentSide) -> BundleIdRequest {
        match next_request(agent).await {
            Request::BundleId(req) => req,
            other => panic!("expected bundle id request, got {other:?}"),
        }
    }

    async fn reply(agent: &mut AgentSide, reply: BundleIdReply) {
        agent.send(Reply::BundleId(reply)).await.unwrap();
    }

    #[tokio::test]
    async fn success_reply_resolves_call() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(99);

        let req = next_bundle_request(&mut agent).await;
        assert_eq!(req.pid, 99);
        reply(&mut agent, BundleIdReply::ok(req.id, "com.example.app")).await;

        assert_eq!(pending.await, Ok("com.example.app".to_string()));
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.contract_violations(), 0);
    }

    #[tokio::test]
    async fn error_reply_resolves_call() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(99);

        let req = next_bundle_request(&mut agent).await;
        let err = AgentError::process_not_found(99);
        reply(&mut agent, BundleIdReply::err(req.id, err.clone())).await;

        assert_eq!(pending.await, Err(RpcError::Agent(err)));
    }

    #[tokio::test]
    async fn replies_may_arrive_out_of_order() {
        let (client, mut agent) = pair();
        let first = client.request_bundle_id(1);
        let second = client.request_bundle_id(2);

        let r1 = next_bundle_request(&mut agent).await;
        let r2 = next_bundle_request(&mut agent).await;
        reply(&mut agent, BundleIdReply::ok(r2.id, "app.two")).await;
        reply(&mut agent, BundleIdReply::ok(r1.id, "app.one")).await;

        assert_eq!(second.await, Ok("app.two".to_string()));
        assert_eq!(first.await, Ok("app.one".to_string()));
    }

    #[tokio::test]
    async fn duplicate_reply_is_counted_as_violation() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(99);

        let req = next_bundle_request(&mut agent).await;
        reply(&mut agent, BundleIdReply::ok(req.id, "a.first")).await;
        reply(&mut agent, BundleIdReply::ok(req.id, "a.second")).await;

        assert_eq!(pending.await, Ok("a.first".to_string()));

        // Second reply is processed after the first; wait for the reader.
        timeout(Duration::from_secs(1), async {
            while client.contract_violations() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("duplicate reply should be detected");
        assert_eq!(client.contract_violations(), 1);
    }

    #[tokio::test]
    async fn both_fields_reply_is_violation() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(5);

        let req = next_bundle_request(&mut agent).await;
        reply(
            &mut agent,
            BundleIdReply {
                id: req.id,
                bundle_id: Some("a.b".into()),
                error: Some(AgentError::internal("boom")),
            },
        )
        .await;

        assert!(matches!(pending.await, Err(RpcError::ContractViolation(_))));
        assert_eq!(client.contract_violations(), 1);
    }

    #[tokio::test]
    async fn connection_close_fails_outstanding_calls() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(8);
        let _ = next_request(&mut agent).await;

        drop(agent);

        assert!(matches!(pending.await, Err(RpcError::Transport(_))));
        assert!(matches!(
            client.request_bundle_id(9).await,
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(client.health().await, Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn dropped_reply_does_not_disturb_other_calls() {
        let (client, mut agent) = pair();
        drop(client.request_bundle_id(1));
        let kept = client.request_bundle_id(2);

        let r1 = next_bundle_request(&mut agent).await;
        let r2 = next_bundle_request(&mut agent).await;
        reply(&mut agent, BundleIdReply::ok(r1.id, "app.one")).await;
        reply(&mut agent, BundleIdReply::ok(r2.id, "app.two")).await;

        assert_eq!(kept.await, Ok("app.two".to_string()));
        assert_eq!(client.contract_violations(), 0);
    }

    #[tokio::test]
    async fn dropping_client_closes_connection() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(3);
        let _ = next_request(&mut agent).await;

        drop(pending);
        drop(client);

        let after = timeout(Duration::from_millis(500), agent.next())
            .await
            .expect("agent should see the connection close");
        assert!(after.is_none(), "expected EOF, got {after:?}");
    }

    #[tokio::test]
    async fn health_round_trip() {
        let (client, mut agent) = pair();
        let agent_task = tokio::spawn(async move {
            let Request::Health(req) = next_request(&mut agent).await else {
                panic!("expected health request");
            };
            agent.send(Reply::Health(HealthReply::ok(req.id))).await.unwrap();
            agent
        });

        let health = client.health().await.unwrap();
        assert!(health.is_ok());
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        drop(agent_task.await.unwrap());
    }

    #[tokio::test]
    async fn mismatched_reply_kind_is_violation() {
        let (client, mut agent) = pair();
        let pending = client.request_bundle_id(4);

        let req = next_bundle_request(&mut agent).await;
        agent.send(Reply::Health(HealthReply::ok(req.id))).await.unwrap();

        assert!(matches!(pending.await, Err(RpcError::ContractViolation(_))));
        assert_eq!(client.contract_violations(), 1);
    }
}
