//! Controller ↔ agent wire contract.
//!
//! Bundle-id and health exchanges, MessagePack-encoded inside
//! length-delimited frames.

pub mod codec;
pub mod protocol;

pub use codec::{AgentCodec, ClientCodec, CodecError, MsgpackCodec};
pub use protocol::{
    AgentError, BundleIdReply, BundleIdRequest, HealthReply, HealthRequest, Reply, Request,
};
