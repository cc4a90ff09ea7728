//! Manager interface — ask the process-side agent which bundle owns a pid.
//!
//! [`ManagerInterface::request_bundle_id`] returns immediately with a
//! [`PendingReply`]. The outcome arrives later, exactly once, on whatever
//! task the transport drives. No retry happens at this layer; callers that
//! need a deadline wrap the reply in `tokio::time::timeout`.
//!
//! [`ManagerClient::health`] rides the same connection to check that the
//! agent is serving.

mod agent;
mod bundle;
mod client;

pub use agent::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_REPLY_TIMEOUT, ManagerAgent};
pub use bundle::{BundleResolver, ProcBundleResolver, StaticBundleResolver};
pub use client::ManagerClient;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::accessibility::Pid;
use crate::ipc::{AgentError, BundleIdReply};

/// Why a request to the agent produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The agent answered with an error.
    #[error("agent error: {0}")]
    Agent(AgentError),
    /// The agent's reply broke the reply contract: both or neither field
    /// set, an empty bundle id, or the wrong reply kind for the call.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// The transport failed before a reply arrived.
    #[error("transport: {0}")]
    Transport(String),
}

/// Controller-side view of the agent.
pub trait ManagerInterface {
    /// Dispatch a bundle-id lookup for `pid` without waiting for it.
    fn request_bundle_id(&self, pid: Pid) -> PendingReply;
}

/// Single-use sender half of a [`PendingReply`].
///
/// `send` consumes the sender, so a call can be completed at most once.
#[derive(Debug)]
pub struct ReplySender(oneshot::Sender<Result<String, RpcError>>);

impl ReplySender {
    /// Complete the call. Returns `false` if the caller already dropped
    /// its [`PendingReply`].
    pub fn send(self, outcome: Result<String, RpcError>) -> bool {
        self.0.send(outcome).is_ok()
    }
}

/// Future resolving to the bundle id, or why there is none.
///
/// Dropping it discards the eventual reply; there is no cancellation.
#[derive(Debug)]
#[must_use = "the reply is discarded unless awaited"]
pub struct PendingReply(oneshot::Receiver<Result<String, RpcError>>);

impl PendingReply {
    /// A linked sender/future pair for implementations of
    /// [`ManagerInterface`].
    pub fn channel() -> (ReplySender, PendingReply) {
        let (tx, rx) = oneshot::channel();
        (ReplySender(tx), PendingReply(rx))
    }
}

impl Future for PendingReply {
    type Output = Result<String, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(RpcError::Transport("call dropped without a reply".into()))
            })
        })
    }
}

/// Check a wire reply against the one-of contract and turn it into the
/// caller-facing outcome.
pub fn settle(reply: BundleIdReply) -> Result<String, RpcError> {
    match (reply.bundle_id, reply.error) {
        (Some(id), None) if !id.is_empty() => Ok(id),
        (Some(_), None) => Err(RpcError::ContractViolation(
            "empty bundle id in success reply".into(),
        )),
        (None, Some(error)) => Err(RpcError::Agent(error)),
        (Some(_), Some(_)) => Err(RpcError::ContractViolation(
            "reply carries both a bundle id and an error".into(),
        )),
        (None, None) => Err(RpcError::ContractViolation(
            "reply carries neither a bundle id nor an error".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_success() {
        assert_eq!(
            settle(BundleIdReply::ok(1, "com.example.app")),
            Ok("com.example.app".to_string())
        );
    }

    #[test]
    fn settle_agent_error() {
        let err = AgentError::process_not_found(99);
        assert_eq!(
            settle(BundleIdReply::err(1, err.clone())),
            Err(RpcError::Agent(err))
        );
    }

    #[test]
    fn settle_rejects_both_fields() {
        let reply = BundleIdReply {
            id: 1,
            bundle_id: Some("a.b".into()),
            error: Some(AgentError::internal("x")),
        };
        assert!(matches!(settle(reply), Err(RpcError::ContractViolation(_))));
    }

    #[test]
    fn settle_rejects_neither_field() {
        let reply = BundleIdReply {
            id: 1,
            bundle_id: None,
            error: None,
        };
        assert!(matches!(settle(reply), Err(RpcError::ContractViolation(_))));
    }

    #[test]
    fn settle_rejects_empty_bundle_id() {
        assert!(matches!(
            settle(BundleIdReply::ok(1, "")),
            Err(RpcError::ContractViolation(_))
        ));
    }

    #[tokio::test]
    async fn pending_reply_resolves_once() {
        let (tx, rx) = PendingReply::channel();
        assert!(tx.send(Ok("a.b".into())));
        assert_eq!(rx.await, Ok("a.b".to_string()));
    }

    #[tokio::test]
    async fn dropped_sender_is_transport_error() {
        let (tx, rx) = PendingReply::channel();
        drop(tx);
        assert!(matches!(rx.await, Err(RpcError::Transport(_))));
    }

    #[test]
    fn send_to_discarded_reply_reports_false() {
        let (tx, rx) = PendingReply::channel();
        drop(rx);
        assert!(!tx.send(Ok("a.b".into())));
    }
}
