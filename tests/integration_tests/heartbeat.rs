// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use nsq_client_rs::connection::Connection;
use tokio::{
    io::BufReader,
    time::timeout,
};

use crate::integration_tests::common::{
    accept_and_identify, bind_mock, read_line, test_config, write_response,
};

/// Scenario 1: a server `RESPONSE _heartbeat_` must be answered with `NOP`
/// within 100ms and never handed to the application as a message.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_is_answered_with_nop() {
    let (listener, addr) = bind_mock().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        accept_and_identify(&mut stream, b"{}").await;

        write_response(&mut stream, b"_heartbeat_").await;

        let mut reader = BufReader::new(&mut stream);
        let line = timeout(Duration::from_millis(100), read_line(&mut reader))
            .await
            .expect("client should answer the heartbeat within 100ms");
        assert_eq!(line, "NOP");
    });

    let connection = Connection::open(addr, test_config()).await.expect("connect");

    timeout(Duration::from_secs(2), server).await.expect("server task timed out").expect("server task panicked");

    connection.close().await.expect("close");
}
