// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use nsq_client_rs::connection::Connection;
use tokio::{io::BufReader, time::timeout};

use crate::integration_tests::common::{
    accept_and_identify, bind_mock, read_line, test_config, write_response,
};

/// Scenario 4: a Connection subscribed to `(t, c, 2)` whose socket dies must
/// re-dial, re-`IDENTIFY`, and re-issue `SUB t c` then `RDY 2` in that order
/// — the exact state it had before the drop.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_replays_the_last_subscription() {
    let (listener, addr) = bind_mock().await;

    let server = tokio::spawn(async move {
        // First generation: handshake, SUB/RDY, then the socket is simply
        // dropped to simulate a dead transport.
        {
            let (mut stream, _) = listener.accept().await.expect("accept #1");
            accept_and_identify(&mut stream, b"{}").await;

            let mut reader = BufReader::new(&mut stream);
            assert_eq!(read_line(&mut reader).await, "SUB t c");
            drop(reader);
            write_response(&mut stream, b"OK").await;

            let mut reader = BufReader::new(&mut stream);
            assert_eq!(read_line(&mut reader).await, "RDY 2");
            drop(reader);
            write_response(&mut stream, b"OK").await;
            // stream drops here, killing the socket.
        }

        // Second generation: the reconnector must replay the exact same
        // subscription.
        let (mut stream, _) = listener.accept().await.expect("accept #2");
        accept_and_identify(&mut stream, b"{}").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "SUB t c");
        drop(reader);
        write_response(&mut stream, b"OK").await;

        let mut reader = BufReader::new(&mut stream);
        assert_eq!(read_line(&mut reader).await, "RDY 2");
        drop(reader);
        write_response(&mut stream, b"OK").await;
    });

    let mut cfg = test_config();
    cfg.reconnect.auto_reconnect = true;

    let connection = Connection::open(addr, cfg).await.expect("connect");
    connection.subscribe("t", "c", 2).await.expect("subscribe");

    timeout(Duration::from_secs(5), server)
        .await
        .expect("reconnect + replay did not complete in time")
        .expect("server task panicked");

    connection.close().await.expect("close");
}
