//! Process-side responder for the manager interface.
//!
//! Every decoded request gets exactly one reply. Requests are resolved
//! concurrently, so replies to independent calls go out in completion
//! order, not request order. Each connection has at most `max_in_flight`
//! lookups running; past that the agent stops reading until one finishes.
//! Health checks are answered inline and never wait for a lookup slot.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::codec::Framed;
use tracing::Instrument;
use uuid::Uuid;

use super::BundleResolver;
use crate::ipc::{
    AgentCodec, AgentError, BundleIdReply, BundleIdRequest, HealthReply, HealthRequest, Reply,
    Request,
};

/// How long a single lookup may take before the agent answers `timeout`.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrent lookups allowed per controller connection.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Answers bundle-id and health requests using a [`BundleResolver`].
pub struct ManagerAgent<R> {
    resolver: Arc<R>,
    reply_timeout: Duration,
    max_in_flight: usize,
}

impl<R> Clone for ManagerAgent<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            reply_timeout: self.reply_timeout,
            max_in_flight: self.max_in_flight,
        }
    }
}

impl<R: BundleResolver> ManagerAgent<R> {
    /// Agent with [`DEFAULT_REPLY_TIMEOUT`] and [`DEFAULT_MAX_IN_FLIGHT`].
    pub fn new(resolver: R) -> Self {
        Self {
            resolver: Arc::new(resolver),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Deadline for a single lookup. A lookup that misses it is answered
    /// with a `timeout` error.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Cap on concurrent lookups per connection. Clamped to at least 1.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let agent = self.clone();
            let span = tracing::info_span!("conn", id = %Uuid::new_v4());
            tokio::spawn(async move { agent.serve_connection(stream).await }.instrument(span));
        }
    }

    /// Serve one controller connection until it closes and every accepted
    /// request has been answered.
    pub async fn serve_connection<T>(&self, io: T)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        tracing::debug!("controller connected");
        let (mut sink, mut stream) = Framed::new(io, AgentCodec::new()).split();
        let (replies, mut outgoing) = mpsc::channel::<Reply>(self.max_in_flight);
        let permits = Arc::new(Semaphore::new(self.max_in_flight));

        let writer = tokio::spawn(
            async move {
                while let Some(reply) = outgoing.recv().await {
                    let id = reply.id();
                    if let Err(e) = sink.send(reply).await {
                        tracing::warn!(id, error = %e, "failed to write reply");
                        return;
                    }
                }
            }
            .in_current_span(),
        );

        while let Some(frame) = stream.next().await {
            let request = match frame {
                Ok(Request::BundleId(request)) => request,
                Ok(Request::Health(HealthRequest { id })) => {
                    tracing::debug!(id, "health check");
                    if replies.send(Reply::Health(HealthReply::ok(id))).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable request, closing connection");
                    break;
                }
            };
            // The semaphore is never closed.
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let agent = self.clone();
            let replies = replies.clone();
            tokio::spawn(
                async move {
                    let reply = Reply::BundleId(agent.answer(request).await);
                    if replies.send(reply).await.is_err() {
                        tracing::debug!("connection writer gone, reply dropped");
                    }
                    drop(permit);
                }
                .in_current_span(),
            );
        }

        // Writer exits once every in-flight answer has been queued.
        drop(replies);
        if let Err(e) = writer.await {
            tracing::error!(error = %e, "reply writer task failed");
        }
        tracing::debug!("controller disconnected");
    }

    /// Resolve one bundle-id request into its single reply.
    async fn answer(&self, request: BundleIdRequest) -> BundleIdReply {
        let BundleIdRequest { id, pid } = request;
        let outcome = tokio::time::timeout(self.reply_timeout, self.resolver.bundle_id(pid)).await;

        match outcome {
            Ok(Ok(bundle_id)) if !bundle_id.is_empty() => {
                tracing::debug!(id, pid, %bundle_id, "resolved");
                BundleIdReply::ok(id, bundle_id)
            }
            Ok(Ok(_)) => {
                tracing::warn!(id, pid, "resolver returned an empty bundle id");
                BundleIdReply::err(id, AgentError::internal("empty bundle id"))
            }
            Ok(Err(error)) => {
                tracing::debug!(id, pid, %error, "resolution failed");
                BundleIdReply::err(id, error)
            }
            Err(_) => {
                tracing::warn!(id, pid, timeout = ?self.reply_timeout, "resolution timed out");
                BundleIdReply::err(id, AgentError::timeout(pid))
            }
        }
    }
}
