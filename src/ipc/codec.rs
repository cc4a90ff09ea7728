//! Length-delimited MessagePack framing.
//!
//! Each frame is a 4-byte big-endian length followed by one
//! `rmp_serde`-encoded message (struct fields as named map keys).

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::protocol::{Reply, Request};

/// Largest accepted frame. Requests and replies are a few dozen bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Codec used by the controller: sends requests, receives replies.
pub type ClientCodec = MsgpackCodec<Request, Reply>;
/// Codec used by the agent: sends replies, receives requests.
pub type AgentCodec = MsgpackCodec<Reply, Request>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes `Out` and decodes `In` over length-delimited frames.
pub struct MsgpackCodec<Out, In> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> MsgpackCodec<Out, In> {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<Out, In> Default for MsgpackCodec<Out, In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Out, In: DeserializeOwned> Decoder for MsgpackCodec<Out, In> {
    type Item = In;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, CodecError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(rmp_serde::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<Out: Serialize, In> Encoder<Out> for MsgpackCodec<Out, In> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = rmp_serde::to_vec_named(&item)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{
        AgentError, BundleIdReply, BundleIdRequest, HealthReply, HealthRequest,
    };

    #[test]
    fn request_crosses_client_to_agent() {
        let mut client = ClientCodec::new();
        let mut agent = AgentCodec::new();
        let mut buf = BytesMut::new();

        let request = Request::BundleId(BundleIdRequest { id: 7, pid: 99 });
        client.encode(request.clone(), &mut buf).unwrap();

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let decoded = agent.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(request));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut agent = AgentCodec::new();
        let mut client = ClientCodec::new();
        let mut full = BytesMut::new();
        client
            .encode(Request::Health(HealthRequest { id: 1 }), &mut full)
            .unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert_eq!(agent.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full);
        assert!(agent.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn error_reply_crosses_agent_to_client() {
        let mut agent = AgentCodec::new();
        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();
        let reply = Reply::BundleId(BundleIdReply::err(4, AgentError::process_not_found(4)));

        agent.encode(reply.clone(), &mut buf).unwrap();
        assert_eq!(client.decode(&mut buf).unwrap(), Some(reply));
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut agent = AgentCodec::new();
        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();

        agent.encode(Reply::Health(HealthReply::ok(1)), &mut buf).unwrap();
        agent
            .encode(Reply::BundleId(BundleIdReply::ok(2, "a.b")), &mut buf)
            .unwrap();

        assert_eq!(client.decode(&mut buf).unwrap().map(|r| r.id()), Some(1));
        assert_eq!(client.decode(&mut buf).unwrap().map(|r| r.id()), Some(2));
        assert_eq!(client.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn garbage_frame_is_decode_error() {
        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&[0xc1, 0xc1, 0xc1]);

        assert!(matches!(client.decode(&mut buf), Err(CodecError::Decode(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut client = ClientCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        assert!(matches!(client.decode(&mut buf), Err(CodecError::Io(_))));
    }
}
