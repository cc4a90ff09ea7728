//! Agent-side bundle-id resolution.
//!
//! The agent delegates the pid → bundle id question to a
//! [`BundleResolver`]. [`ProcBundleResolver`] inspects live processes via
//! `/proc`; [`StaticBundleResolver`] answers from a fixed table.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd;

use crate::accessibility::Pid;
use crate::ipc::AgentError;

/// Resolves a pid to the bundle identifier of the app it runs.
pub trait BundleResolver: Send + Sync + 'static {
    /// Return a non-empty bundle id, or the reason there is none.
    fn bundle_id(&self, pid: Pid) -> impl Future<Output = Result<String, AgentError>> + Send;
}

/// Fixed pid → bundle id table.
#[derive(Debug, Clone, Default)]
pub struct StaticBundleResolver {
    table: HashMap<Pid, String>,
}

impl StaticBundleResolver {
    /// Empty table: every pid is `process_not_found`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `pid` to `bundle_id`, replacing any earlier entry.
    pub fn with(mut self, pid: Pid, bundle_id: impl Into<String>) -> Self {
        self.table.insert(pid, bundle_id.into());
        self
    }
}

impl BundleResolver for StaticBundleResolver {
    async fn bundle_id(&self, pid: Pid) -> Result<String, AgentError> {
        self.table
            .get(&pid)
            .cloned()
            .ok_or_else(|| AgentError::process_not_found(pid))
    }
}

/// Derives a bundle id from a live process's command name.
///
/// The id is `<prefix>.<comm>`, where `comm` is read from
/// `/proc/{pid}/comm` and reduced to `[A-Za-z0-9.-]`.
#[derive(Debug, Clone)]
pub struct ProcBundleResolver {
    prefix: String,
    proc_root: PathBuf,
}

impl ProcBundleResolver {
    /// Resolver that names bundles `<prefix>.<comm>` from `/proc`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Read process metadata from `root` instead of `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Signal-0 liveness check. `pid <= 0` addresses process groups, so it
    /// is never signalled.
    fn check_alive(pid: Pid) -> Result<(), AgentError> {
        if pid <= 0 {
            return Err(AgentError::process_not_found(pid));
        }
        match kill(unistd::Pid::from_raw(pid), None) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(AgentError::process_not_found(pid)),
            Err(Errno::EPERM) => Err(AgentError::not_instrumentable(
                pid,
                "owned by another user",
            )),
            Err(e) => Err(AgentError::internal(format!("signal pid {pid}: {e}"))),
        }
    }
}

/// Keep characters valid in a bundle identifier; map the rest to `-`.
fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl BundleResolver for ProcBundleResolver {
    async fn bundle_id(&self, pid: Pid) -> Result<String, AgentError> {
        Self::check_alive(pid)?;

        let comm_path = self.proc_root.join(pid.to_string()).join("comm");
        let comm = match tokio::fs::read_to_string(&comm_path).await {
            Ok(comm) => comm,
            // Exited between the liveness check and the read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::not_instrumentable(pid, "no command name"));
            }
            Err(e) => {
                return Err(AgentError::not_instrumentable(
                    pid,
                    format!("read {}: {e}", comm_path.display()),
                ));
            }
        };

        let name = sanitize(&comm);
        if name.is_empty() {
            return Err(AgentError::not_instrumentable(pid, "empty command name"));
        }
        Ok(format!("{}.{name}", self.prefix))
    }
}
