// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use nsq_client_rs::cfg::config::Config;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

pub const FRAME_TYPE_RESPONSE: u32 = 0;
pub const FRAME_TYPE_ERROR: u32 = 1;
pub const FRAME_TYPE_MESSAGE: u32 = 2;

/// A config tuned for fast, deterministic tests: reconnects (where wanted)
/// retry almost immediately, and dial/handshake deadlines are short enough
/// that a genuinely dead mock fails the test quickly rather than hanging it.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.reconnect.auto_reconnect = false;
    cfg.reconnect.initial_delay = Duration::from_millis(20);
    cfg.reconnect.max_delay = Duration::from_millis(100);
    cfg.timeouts.dial = Duration::from_secs(2);
    cfg.timeouts.identify = Duration::from_secs(2);
    cfg.timeouts.cls_drain = Duration::from_millis(200);
    cfg.validate_and_normalize().expect("default test config is valid");
    cfg
}

pub async fn bind_mock() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock nsqd");
    let addr = listener.local_addr().expect("local addr").to_string();
    (listener, addr)
}

pub async fn read_magic(stream: &mut TcpStream) {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.expect("read magic");
    assert_eq!(&magic, b"  V2");
}

/// Reads one ASCII command line, without the trailing `\n`.
pub async fn read_line(reader: &mut BufReader<&mut TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read command line");
    line.trim_end_matches('\n').to_string()
}

/// Reads a 4-byte-length-prefixed binary payload (IDENTIFY/AUTH/PUB bodies).
pub async fn read_sized(reader: &mut BufReader<&mut TcpStream>) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.expect("read payload length");
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.expect("read payload");
    payload
}

pub async fn write_frame(stream: &mut TcpStream, frame_type: u32, payload: &[u8]) {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_u32((4 + payload.len()) as u32);
    buf.put_u32(frame_type);
    buf.put_slice(payload);
    stream.write_all(&buf).await.expect("write frame");
}

pub async fn write_response(stream: &mut TcpStream, body: &[u8]) {
    write_frame(stream, FRAME_TYPE_RESPONSE, body).await;
}

pub async fn write_error(stream: &mut TcpStream, body: &[u8]) {
    write_frame(stream, FRAME_TYPE_ERROR, body).await;
}

pub async fn write_message(
    stream: &mut TcpStream,
    id: &str,
    attempts: u16,
    timestamp_ns: u64,
    body: &[u8],
) {
    assert_eq!(id.len(), 16, "NSQ message ids are always 16 ASCII bytes");
    let mut payload = BytesMut::with_capacity(26 + body.len());
    payload.put_u64(timestamp_ns);
    payload.put_u16(attempts);
    payload.put_slice(id.as_bytes());
    payload.put_slice(body);
    write_frame(stream, FRAME_TYPE_MESSAGE, &payload).await;
}

/// Completes the handshake a real `nsqd` performs: reads the magic and the
/// `IDENTIFY` command, then replies with the caller-supplied JSON body.
/// Returns the stream wrapped for line-oriented reads so the scenario can
/// continue the script.
pub async fn accept_and_identify(stream: &mut TcpStream, identify_response: &[u8]) {
    read_magic(stream).await;

    let mut reader = BufReader::new(&mut *stream);
    let line = read_line(&mut reader).await;
    assert_eq!(line, "IDENTIFY");
    let _body = read_sized(&mut reader).await;
    drop(reader);

    write_response(stream, identify_response).await;
}

/// A minimal `nsqd` stand-in for discovery tests: completes the handshake on
/// every accepted connection and replies `OK` to whatever command line
/// follows (`SUB`, `RDY`, ...), forever, until the peer disconnects.
pub async fn run_minimal_nsqd(listener: TcpListener) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else { return };
        tokio::spawn(async move {
            accept_and_identify(&mut stream, b"{}").await;
            loop {
                let mut reader = BufReader::new(&mut stream);
                let line = read_line(&mut reader).await;
                drop(reader);
                if line.is_empty() {
                    return;
                }
                write_response(&mut stream, b"OK").await;
            }
        });
    }
}

/// A minimal `nsqlookupd` stand-in: serves one JSON body per accepted
/// connection, in order, repeating the last body once the list is
/// exhausted.
pub async fn run_http_mock(listener: TcpListener, bodies: Vec<String>) {
    let mut served = 0usize;
    loop {
        let Ok((mut stream, _)) = listener.accept().await else { return };
        let body = bodies.get(served).or_else(|| bodies.last()).cloned().unwrap_or_default();
        served += 1;

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: \
                 {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}
