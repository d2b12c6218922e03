// src/core/protocol/frame.rs

//! Implements the frames the server writes to clients and the `Encoder` that
//! serializes them onto the wire.

use super::info::ServerInfo;
use crate::core::SpinelMQError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

const CRLF: &[u8] = b"\r\n";

/// A message routed to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: Bytes,
    pub sid: Bytes,
    pub reply_to: Option<Bytes>,
    pub payload: Bytes,
}

/// A single server-to-client protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Info(Box<ServerInfo>),
    Ping,
    Pong,
    Ok,
    /// An `-ERR` frame. The message is written between single quotes.
    Err(String),
    Msg(Message),
}

impl ServerFrame {
    pub fn err(message: impl Into<String>) -> Self {
        ServerFrame::Err(message.into())
    }

    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, SpinelMQError> {
        let mut buf = BytesMut::new();
        ServerFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// A `tokio_util::codec` encoder for `ServerFrame`s.
#[derive(Debug, Default)]
pub struct ServerFrameCodec;

impl Encoder<ServerFrame> for ServerFrameCodec {
    type Error = SpinelMQError;

    fn encode(&mut self, item: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ServerFrame::Info(info) => {
                let json = serde_json::to_vec(&info)?;
                dst.reserve(5 + json.len() + CRLF.len());
                dst.extend_from_slice(b"INFO ");
                dst.extend_from_slice(&json);
                dst.extend_from_slice(CRLF);
            }
            ServerFrame::Ping => dst.extend_from_slice(b"PING\r\n"),
            ServerFrame::Pong => dst.extend_from_slice(b"PONG\r\n"),
            ServerFrame::Ok => dst.extend_from_slice(b"+OK\r\n"),
            ServerFrame::Err(message) => {
                dst.extend_from_slice(b"-ERR '");
                dst.extend_from_slice(message.as_bytes());
                dst.extend_from_slice(b"'\r\n");
            }
            ServerFrame::Msg(msg) => {
                let mut len_buf = itoa::Buffer::new();
                let len = len_buf.format(msg.payload.len());
                let reply_len = msg.reply_to.as_ref().map_or(0, |r| r.len() + 1);
                dst.reserve(
                    4 + msg.subject.len()
                        + 1
                        + msg.sid.len()
                        + 1
                        + reply_len
                        + len.len()
                        + msg.payload.len()
                        + 2 * CRLF.len(),
                );

                dst.extend_from_slice(b"MSG ");
                dst.extend_from_slice(&msg.subject);
                dst.extend_from_slice(b" ");
                dst.extend_from_slice(&msg.sid);
                dst.extend_from_slice(b" ");
                if let Some(reply_to) = &msg.reply_to {
                    dst.extend_from_slice(reply_to);
                    dst.extend_from_slice(b" ");
                }
                dst.extend_from_slice(len.as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&msg.payload);
                dst.extend_from_slice(CRLF);
            }
        }
        Ok(())
    }
}
