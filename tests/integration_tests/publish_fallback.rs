// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use nsq_client_rs::{Writer, error::Error};
use tokio::io::BufReader;

use crate::integration_tests::common::{
    accept_and_identify, bind_mock, read_line, read_sized, test_config, write_response,
};

/// Scenario 6: a Writer configured with `[X, Y]` where X refuses
/// connections must still succeed against Y with no error surfaced to the
/// caller; if every address refuses, the caller gets `NoConnectionsError`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_falls_back_to_the_next_address() {
    let (dead_listener, dead_addr) = bind_mock().await;
    drop(dead_listener); // nothing is listening on `dead_addr` anymore

    let (listener, addr) = bind_mock().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        accept_and_identify(&mut stream, b"{}").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "PUB orders");
        assert_eq!(read_sized(&mut reader).await, b"payload");
        drop(reader);
        write_response(&mut stream, b"OK").await;
    });

    let writer = Writer::new(vec![dead_addr, addr], test_config());
    writer
        .publish("orders", Bytes::from_static(b"payload"))
        .await
        .expect("publish should fall back to the live address");

    server.await.expect("server task panicked");
    writer.close().await.expect("close");
}

/// When every configured address refuses, the caller sees
/// `Error::NoConnections` rather than a dial error from whichever address
/// happened to be tried last.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_fails_with_no_connections_when_every_address_refuses() {
    let (first_listener, first_addr) = bind_mock().await;
    drop(first_listener);
    let (second_listener, second_addr) = bind_mock().await;
    drop(second_listener);

    let writer = Writer::new(vec![first_addr, second_addr], test_config());
    let err = writer
        .publish("orders", Bytes::from_static(b"payload"))
        .await
        .expect_err("every address refuses connections");

    assert!(matches!(err, Error::NoConnections));
}
