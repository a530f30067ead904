// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use futures::StreamExt;
use nsq_client_rs::connection::Connection;
use tokio::io::BufReader;

use crate::integration_tests::common::{
    accept_and_identify, bind_mock, read_line, test_config, write_message, write_response,
};

/// Scenario 3: after `SUB t c` / `RDY 1`, the server sends one `MESSAGE`;
/// the iterator must yield exactly that message, and `fin()` must write
/// `FIN <id>\n` back.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribe_then_receive_and_fin_a_message() {
    let (listener, addr) = bind_mock().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        accept_and_identify(&mut stream, b"{}").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "SUB t c");
        drop(reader);
        write_response(&mut stream, b"OK").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "RDY 1");
        drop(reader);
        write_response(&mut stream, b"OK").await;

        write_message(
            &mut stream,
            "0123456789abcdef",
            1,
            1_700_000_000_000_000_000,
            b"hello",
        )
        .await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "FIN 0123456789abcdef");
    });

    let connection = Connection::open(addr, test_config()).await.expect("connect");
    connection.subscribe("t", "c", 1).await.expect("subscribe");

    let mut messages = connection.messages().expect("messages stream");
    let message = messages.next().await.expect("one message should arrive");

    assert_eq!(message.id, "0123456789abcdef");
    assert_eq!(&message.body[..], b"hello");
    assert_eq!(message.attempts, 1);
    assert_eq!(message.timestamp, 1_700_000_000_000_000_000);

    message.fin().expect("fin");

    server.await.expect("server task panicked");
    connection.close().await.expect("close");
}
