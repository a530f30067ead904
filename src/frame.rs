// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The inbound wire frame: `RESPONSE` / `ERROR` / `MESSAGE`, tagged by the
//! 4-byte frame-type field (§4.1). A `MESSAGE` frame's payload is decoded
//! eagerly into [`RawMessage`]; [`crate::message::Message`] wraps it with an
//! ack path back into the owning connection.

use std::time::Instant;

use bytes::Bytes;

use crate::error::{Error, Result};

pub const FRAME_TYPE_RESPONSE: u32 = 0;
pub const FRAME_TYPE_ERROR: u32 = 1;
pub const FRAME_TYPE_MESSAGE: u32 = 2;

pub const HEARTBEAT_BODY: &[u8] = b"_heartbeat_";
pub const OK_BODY: &[u8] = b"OK";
pub const CLOSE_WAIT_BODY: &[u8] = b"CLOSE_WAIT";

/// Length of a MESSAGE frame's fixed header: 8-byte timestamp + 2-byte
/// attempts + 16-byte ASCII id.
const MESSAGE_HEADER_LEN: usize = 8 + 2 + 16;

#[derive(Debug, Clone)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(RawMessage),
}

/// The wire contents of a MESSAGE frame, before it is wrapped with an ack
/// path (see [`crate::message::Message`]).
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub body: Bytes,
    pub attempts: u16,
    pub timestamp_ns: u64,
}

impl Frame {
    /// Parses one frame's payload, given its type tag. `payload` excludes
    /// the 8-byte (type + size) prefix already consumed by the codec.
    pub fn from_wire(frame_type: u32, payload: Bytes) -> Result<Self> {
        match frame_type {
            FRAME_TYPE_RESPONSE => Ok(Frame::Response(payload)),
            FRAME_TYPE_ERROR => Ok(Frame::Error(payload)),
            FRAME_TYPE_MESSAGE => Ok(Frame::Message(RawMessage::from_wire(payload)?)),
            other => Err(Error::protocol(format!("unknown frame type {other}"))),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == HEARTBEAT_BODY)
    }
}

impl RawMessage {
    fn from_wire(payload: Bytes) -> Result<Self> {
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(Error::protocol("MESSAGE frame shorter than fixed header"));
        }

        let timestamp_ns = u64::from_be_bytes(
            payload[0..8].try_into().map_err(|_| Error::protocol("bad timestamp"))?,
        );
        let attempts = u16::from_be_bytes(
            payload[8..10].try_into().map_err(|_| Error::protocol("bad attempts"))?,
        );
        let id_bytes = &payload[10..26];
        let id = std::str::from_utf8(id_bytes)
            .map_err(|_| Error::protocol("message id is not ASCII"))?
            .to_string();
        let body = payload.slice(MESSAGE_HEADER_LEN..);

        Ok(RawMessage { id, body, attempts, timestamp_ns })
    }
}

/// Monotonic receipt marker, recorded the moment a [`RawMessage`] is lifted
/// into a [`crate::message::Message`]; used to derive `is_timed_out`.
pub type ReceivedAt = Instant;
