// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The closed set of NSQ commands this core knows how to encode.
//!
//! The wire command set is small and fixed (§6 of the design doc), so it is
//! modeled as a tagged variant rather than an open dispatch table — there is
//! no plugin point for "new commands" the way the teacher's PDU hierarchy
//! has one BHS opcode per iSCSI operation.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// The 4-byte magic sent once, before any command, to select protocol v2.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// A single message body plus an optional per-message deferral, as used by
/// `MPUB`.
#[derive(Debug, Clone)]
pub struct PublishBody(pub Bytes);

#[derive(Debug, Clone)]
pub enum Command {
    Identify(serde_json::Value),
    Auth(Bytes),
    Sub { topic: String, channel: String },
    Rdy(u32),
    Fin(String),
    Req { id: String, timeout_ms: u64 },
    Touch(String),
    Cls,
    Nop,
    Pub { topic: String, body: Bytes },
    Mpub { topic: String, bodies: Vec<Bytes> },
    Dpub { topic: String, delay_ms: u64, body: Bytes },
}

impl Command {
    /// Whether the wire protocol expects the server to reply to this
    /// command. Only `NOP` is truly fire-and-forget at the protocol level;
    /// `FIN`/`REQ`/`TOUCH` reply only on error (§4.2), so the core still
    /// treats them as not expecting a correlated OK.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Command::Nop | Command::Fin(_) | Command::Req { .. } | Command::Touch(_)
        )
    }

    /// Encodes this command onto `dst`, following the ASCII-verb-plus-args
    /// framing with binary length-prefixed payloads for the `PUB` family
    /// (§4.1).
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Command::Identify(body) => {
                let payload = serde_json::to_vec(body)
                    .map_err(|e| Error::protocol(format!("IDENTIFY encode: {e}")))?;
                write_line(dst, "IDENTIFY");
                write_sized_payload(dst, &payload);
            },
            Command::Auth(secret) => {
                write_line(dst, "AUTH");
                write_sized_payload(dst, secret);
            },
            Command::Sub { topic, channel } => {
                write_line(dst, &format!("SUB {topic} {channel}"));
            },
            Command::Rdy(n) => {
                write_line(dst, &format!("RDY {n}"));
            },
            Command::Fin(id) => {
                write_line(dst, &format!("FIN {id}"));
            },
            Command::Req { id, timeout_ms } => {
                write_line(dst, &format!("REQ {id} {timeout_ms}"));
            },
            Command::Touch(id) => {
                write_line(dst, &format!("TOUCH {id}"));
            },
            Command::Cls => {
                write_line(dst, "CLS");
            },
            Command::Nop => {
                write_line(dst, "NOP");
            },
            Command::Pub { topic, body } => {
                write_line(dst, &format!("PUB {topic}"));
                write_sized_payload(dst, body);
            },
            Command::Mpub { topic, bodies } => {
                write_line(dst, &format!("MPUB {topic}"));
                let mut payload = BytesMut::with_capacity(
                    4 + bodies.iter().map(|b| 4 + b.len()).sum::<usize>(),
                );
                payload.put_u32(bodies.len() as u32);
                for body in bodies {
                    payload.put_u32(body.len() as u32);
                    payload.extend_from_slice(body);
                }
                write_sized_payload(dst, &payload);
            },
            Command::Dpub { topic, delay_ms, body } => {
                write_line(dst, &format!("DPUB {topic} {delay_ms}"));
                write_sized_payload(dst, body);
            },
        }
        Ok(())
    }
}

fn write_line(dst: &mut BytesMut, line: &str) {
    dst.reserve(line.len() + 1);
    dst.extend_from_slice(line.as_bytes());
    dst.extend_from_slice(b"\n");
}

fn write_sized_payload(dst: &mut BytesMut, payload: &[u8]) {
    dst.reserve(4 + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(payload);
}
