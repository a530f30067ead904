// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The reconnect supervisor (§4.3): watches one [`Connection`] for transport
//! death and transparently re-dials, re-handshakes, and replays the last
//! subscription.

use std::sync::Weak;

use tracing::{info, warn};

use crate::{
    connection::{Connection, status::ConnectionStatus},
    utils::jittered_backoff,
};

/// Runs for the lifetime of one `Connection`. Exits as soon as the
/// connection is dropped or explicitly closed.
pub(crate) async fn supervise(connection: Weak<Connection>) {
    let mut attempt: u32 = 0;

    loop {
        let generation_cancel = {
            let Some(connection) = connection.upgrade() else { return };
            if connection.is_closing() {
                return;
            }
            match connection.generation_cancel() {
                Some(cancel) => cancel,
                None => return,
            }
        };

        generation_cancel.cancelled().await;

        let Some(connection) = connection.upgrade() else { return };
        if connection.is_closing() {
            return;
        }

        connection.set_status(ConnectionStatus::Reconnecting);
        connection.clear_live();

        loop {
            let delay = jittered_backoff(
                attempt,
                connection.config().reconnect.initial_delay,
                connection.config().reconnect.max_delay,
            );
            tokio::time::sleep(delay).await;

            if connection.is_closing() {
                return;
            }

            match connection.connect_once().await {
                Ok(()) => {
                    info!(addr = connection.addr(), attempt, "reconnected");
                    attempt = 0;
                    connection.set_status(ConnectionStatus::Connected);

                    if let Some(sub) = connection.subscription_snapshot() {
                        if let Err(e) =
                            connection.subscribe(sub.topic, sub.channel, sub.rdy).await
                        {
                            warn!("resubscribe after reconnect failed: {e}");
                        }
                    }
                    break;
                },
                Err(e) => {
                    warn!(addr = connection.addr(), attempt, "reconnect attempt failed: {e}");
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }
}
