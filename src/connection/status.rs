// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection lifecycle state machine (§3). Exposed to callers through a
//! `watch` channel so observing the current status never contends with the
//! read or write path.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Init,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Closed)
    }

    pub fn is_live(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Subscribed)
    }
}

/// A cheap, cloneable handle onto a `watch`-backed status cell.
#[derive(Debug, Clone)]
pub struct StatusCell {
    tx: watch::Sender<ConnectionStatus>,
}

impl StatusCell {
    pub fn new(initial: ConnectionStatus) -> Self {
        StatusCell { tx: watch::Sender::new(initial) }
    }

    pub fn set(&self, status: ConnectionStatus) {
        self.tx.send_replace(status);
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}
