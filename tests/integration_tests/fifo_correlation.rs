// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use nsq_client_rs::{command::Command, connection::Connection, error::Error};
use tokio::io::BufReader;

use crate::integration_tests::common::{
    accept_and_identify, bind_mock, read_line, read_sized, test_config, write_error,
    write_response,
};

/// Scenario 2: `PUB a m1` then `PUB a m2`, server replies `OK` then
/// `E_BAD_TOPIC` — the first `execute` must resolve before the second is
/// even sent, and each reply must land on the call that produced it, not
/// the other way around.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn responses_correlate_to_commands_in_fifo_order() {
    let (listener, addr) = bind_mock().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        accept_and_identify(&mut stream, b"{}").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "PUB a");
        assert_eq!(read_sized(&mut reader).await, b"m1");
        drop(reader);
        write_response(&mut stream, b"OK").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "PUB a");
        assert_eq!(read_sized(&mut reader).await, b"m2");
        drop(reader);
        write_error(&mut stream, b"E_BAD_TOPIC").await;
    });

    let connection = Connection::open(addr, test_config()).await.expect("connect");

    let first = connection
        .execute(Command::Pub { topic: "a".into(), body: Bytes::from_static(b"m1") })
        .await
        .expect("first PUB should succeed");
    assert_eq!(&first[..], b"OK");

    let second = connection
        .execute(Command::Pub { topic: "a".into(), body: Bytes::from_static(b"m2") })
        .await
        .expect_err("second PUB should fail with the server's ERROR reply");
    match second {
        Error::Protocol { code } => assert_eq!(code, "E_BAD_TOPIC"),
        other => panic!("expected Error::Protocol, got {other:?}"),
    }

    server.await.expect("server task panicked");
    connection.close().await.expect("close");
}
