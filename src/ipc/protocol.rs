//! Controller ↔ agent frames.
//!
//! Two exchanges share one connection: bundle-id resolution and a health
//! check. Every request carries a correlation `id`; the agent echoes it in
//! the matching reply.
//!
//! A bundle-id reply carries exactly one of `bundle_id` or `error`. Frames
//! that break this rule are still decodable so the controller can detect
//! and report the violation instead of failing the whole connection.

use serde::{Deserialize, Serialize};

use crate::accessibility::Pid;

/// Error code: no process with the requested pid.
pub const PROCESS_NOT_FOUND: &str = "process_not_found";
/// Error code: process exists but cannot be attributed to a bundle.
pub const NOT_INSTRUMENTABLE: &str = "not_instrumentable";
/// Error code: agent gave up waiting on its own lookup.
pub const TIMEOUT: &str = "timeout";
/// Error code: anything else that went wrong agent-side.
pub const INTERNAL: &str = "internal";

/// Health status reported by a serving agent.
pub const STATUS_OK: &str = "ok";

/// Controller → agent frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Resolve the bundle id of a process.
    BundleId(BundleIdRequest),
    /// Liveness check.
    Health(HealthRequest),
}

impl Request {
    /// Correlation id of the wrapped request.
    pub fn id(&self) -> u64 {
        match self {
            Self::BundleId(r) => r.id,
            Self::Health(r) => r.id,
        }
    }
}

/// Agent → controller frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// Outcome of a [`Request::BundleId`].
    BundleId(BundleIdReply),
    /// Outcome of a [`Request::Health`].
    Health(HealthReply),
}

impl Reply {
    /// Correlation id of the wrapped reply.
    pub fn id(&self) -> u64 {
        match self {
            Self::BundleId(r) => r.id,
            Self::Health(r) => r.id,
        }
    }
}

/// Resolve the bundle id of `pid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleIdRequest {
    /// Correlation number, unique per connection.
    pub id: u64,
    /// Process to resolve. Not validated by the controller.
    pub pid: Pid,
}

/// Outcome of a [`BundleIdRequest`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleIdReply {
    /// Echo of the request's correlation number.
    pub id: u64,
    /// Non-empty bundle identifier on success.
    pub bundle_id: Option<String>,
    /// Why there is no bundle identifier.
    pub error: Option<AgentError>,
}

impl BundleIdReply {
    /// Success reply.
    pub fn ok(id: u64, bundle_id: impl Into<String>) -> Self {
        Self {
            id,
            bundle_id: Some(bundle_id.into()),
            error: None,
        }
    }

    /// Failure reply.
    pub fn err(id: u64, error: AgentError) -> Self {
        Self {
            id,
            bundle_id: None,
            error: Some(error),
        }
    }
}

/// Ask whether the agent is serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRequest {
    /// Correlation number, unique per connection.
    pub id: u64,
}

/// Agent health, answered without touching any process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReply {
    /// Echo of the request's correlation number.
    pub id: u64,
    /// [`STATUS_OK`] while the agent accepts requests.
    pub status: String,
    /// Agent package version.
    pub version: String,
}

impl HealthReply {
    /// Healthy reply stamped with this crate's version.
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            status: STATUS_OK.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// True when `status` is [`STATUS_OK`], ignoring case.
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_OK)
    }
}

/// Structured error reported by the agent. The taxonomy is the agent's;
/// controllers treat `code` as opaque beyond logging and matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AgentError {
    /// Machine-readable category, e.g. [`PROCESS_NOT_FOUND`].
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl AgentError {
    /// Error with an arbitrary code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// [`PROCESS_NOT_FOUND`] for `pid`.
    pub fn process_not_found(pid: Pid) -> Self {
        Self::new(PROCESS_NOT_FOUND, format!("no process with pid {pid}"))
    }

    /// [`NOT_INSTRUMENTABLE`] for `pid`, with the reason.
    pub fn not_instrumentable(pid: Pid, reason: impl std::fmt::Display) -> Self {
        Self::new(
            NOT_INSTRUMENTABLE,
            format!("process {pid} is not instrumentable: {reason}"),
        )
    }

    /// [`TIMEOUT`] for `pid`.
    pub fn timeout(pid: Pid) -> Self {
        Self::new(TIMEOUT, format!("lookup for pid {pid} timed out"))
    }

    /// [`INTERNAL`] with free-form detail.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL, message)
    }
}
