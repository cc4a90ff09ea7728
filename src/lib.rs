//! Remote UI element addressing for an out-of-process test controller.
//!
//! - [`element`]: one identity type for native accessibility nodes and
//!   mock stand-ins.
//! - [`manager`]: asynchronous pid → bundle id queries against the
//!   process-side agent, and the agent itself.

pub mod accessibility;
pub mod config;
pub mod element;
pub mod ipc;
pub mod manager;
