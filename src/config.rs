//! Command-line configuration.
//!
//! `serve` runs the process-side agent on a Unix socket; `bundle-id` and
//! `health` are one-shot controller calls against a running agent.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::accessibility::Pid;

/// Socket file name under the runtime directory.
const SOCKET_NAME: &str = "idc-remote.sock";

/// Invalid command-line values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Prefix would produce malformed bundle ids.
    #[error("bundle prefix must be non-empty and contain only [A-Za-z0-9.-]: {0:?}")]
    InvalidBundlePrefix(String),
    /// A timeout of zero would fail every call.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    /// The agent would never answer anything.
    #[error("max in-flight lookups must be greater than zero")]
    ZeroInFlight,
}

/// Top-level command line.
#[derive(Debug, Parser)]
#[command(name = "idc-remote", version, about = "Remote UI element bundle-id agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent that answers bundle-id requests.
    Serve(ServeArgs),
    /// Ask a running agent for the bundle id of a process.
    BundleId(BundleIdArgs),
    /// Check that an agent is serving; prints `ok`.
    Health(HealthArgs),
}

/// Options for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Unix socket to listen on.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Per-request lookup deadline in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub reply_timeout_ms: u64,
    /// Reverse-DNS prefix for derived bundle ids.
    #[arg(long, default_value = "local.process")]
    pub bundle_prefix: String,
    /// Concurrent lookups allowed per controller connection.
    #[arg(long, default_value_t = crate::manager::DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,
}

impl ServeArgs {
    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.bundle_prefix;
        let valid = !prefix.is_empty()
            && !prefix.starts_with('.')
            && !prefix.ends_with('.')
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !valid {
            return Err(ConfigError::InvalidBundlePrefix(prefix.clone()));
        }
        if self.reply_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        Ok(())
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn socket_path(&self) -> PathBuf {
        resolve_socket(self.socket.clone())
    }
}

/// Options for `bundle-id`.
#[derive(Debug, Args)]
pub struct BundleIdArgs {
    /// Process id to resolve.
    #[arg(long, allow_negative_numbers = true)]
    pub pid: Pid,
    /// Unix socket of the agent.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// How long to wait for the reply, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,
}

impl BundleIdArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn socket_path(&self) -> PathBuf {
        resolve_socket(self.socket.clone())
    }
}

/// Options for `health`.
#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Unix socket of the agent.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// How long to wait for the agent, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,
}

impl HealthArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn socket_path(&self) -> PathBuf {
        resolve_socket(self.socket.clone())
    }
}

/// `$XDG_RUNTIME_DIR/idc-remote.sock`, else `/tmp/idc-remote-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(SOCKET_NAME),
        _ => PathBuf::from(format!("/tmp/idc-remote-{}.sock", nix::unistd::getuid())),
    }
}

/// `explicit` if given, else [`default_socket_path`].
pub fn resolve_socket(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(default_socket_path)
}
