//! Accessibility subsystem seam — the lookups element identities are built from.
//!
//! The real accessibility tree lives in another process and is owned by the
//! platform. This crate only reads ownership facts from it through the
//! [`Accessibility`] trait; platform adapters implement the trait, and
//! [`FixtureTree`] provides a deterministic in-memory backend.

mod fixture;

pub use fixture::FixtureTree;

use std::sync::Arc;

/// OS process identifier, as reported by the accessibility subsystem.
pub type Pid = i32;

/// Opaque, non-owning reference to a node in a foreign accessibility tree.
///
/// The wrapped value is an id assigned by the backend. It is never
/// dereferenced here; the node's lifetime belongs to the subsystem, so a
/// stale handle simply fails the next lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxHandle(u64);

impl AxHandle {
    /// Wrap a backend-assigned node id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The backend-assigned node id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ax#{}", self.0)
    }
}

/// Read-only queries against the live accessibility tree.
///
/// Calls may block briefly while the subsystem talks to a slow target
/// process. Callers must not invoke them from contexts that cannot block.
pub trait Accessibility: Send + Sync {
    /// Return the pid of the process currently owning `handle`, or `None`
    /// if the owner cannot be determined (e.g. the node was invalidated).
    fn lookup_owning_process(&self, handle: AxHandle) -> Option<Pid>;

    /// Return the root node of `pid`'s accessibility tree, or `None` if the
    /// process is not visible to the subsystem.
    fn root_element(&self, pid: Pid) -> Option<AxHandle>;

    /// Return the node spanning the whole on-screen UI.
    fn system_root_element(&self) -> AxHandle;
}

impl<A: Accessibility + ?Sized> Accessibility for Arc<A> {
    fn lookup_owning_process(&self, handle: AxHandle) -> Option<Pid> {
        (**self).lookup_owning_process(handle)
    }

    fn root_element(&self, pid: Pid) -> Option<AxHandle> {
        (**self).root_element(pid)
    }

    fn system_root_element(&self) -> AxHandle {
        (**self).system_root_element()
    }
}
