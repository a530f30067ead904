// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `tokio_util::codec` glue binding [`Command`] and [`Frame`] to a
//! `Framed<TcpStream, _>` transport (§4.1).
//!
//! Wire shape for every inbound frame: a 4-byte big-endian size (covering
//! everything after itself), then a 4-byte big-endian frame type, then the
//! frame body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    command::Command,
    error::{Error, Result},
    frame::Frame,
};

/// Frames above this size are refused rather than buffered, guarding against
/// a server bug (or a corrupted stream) turning into unbounded memory growth.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const SIZE_PREFIX_LEN: usize = 4;
const TYPE_FIELD_LEN: usize = 4;

#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }

        let size = u32::from_be_bytes(src[..SIZE_PREFIX_LEN].try_into().expect("4 bytes"));
        if size < TYPE_FIELD_LEN as u32 {
            return Err(Error::protocol("frame size smaller than the type field"));
        }
        if size > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!("frame of {size} bytes exceeds the limit")));
        }

        let total_len = SIZE_PREFIX_LEN + size as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(SIZE_PREFIX_LEN);
        let mut body = src.split_to(size as usize).freeze();
        let frame_type = u32::from_be_bytes(body[..TYPE_FIELD_LEN].try_into().expect("4 bytes"));
        let payload = body.split_off(TYPE_FIELD_LEN);

        Ok(Some(Frame::from_wire(frame_type, payload)?))
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

/// Encodes the protocol magic; sent exactly once, before any command, and
/// ahead of the `Framed` transport's own codec loop.
pub fn encode_magic(dst: &mut BytesMut) {
    dst.put_slice(crate::command::MAGIC_V2);
}

/// Appends the 4-byte size + 4-byte type prefix that real NSQ servers also
/// use on their own inbound traffic; kept for symmetry and for the mock
/// server used in integration tests.
#[cfg(test)]
fn encode_raw_frame(frame_type: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + TYPE_FIELD_LEN + payload.len());
    buf.put_u32((TYPE_FIELD_LEN + payload.len()) as u32);
    buf.put_u32(frame_type);
    buf.put_slice(payload);
    buf.freeze()
}
