// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Consumer facade (§4.5): maintains one [`Connection`] per discovered
//! `nsqd` for a `(topic, channel)`, distributes `RDY` credits across them,
//! and fair-merges their inbound messages into a single stream.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    cfg::config::Config,
    connection::Connection,
    error::Result,
    lookup::LookupClient,
    message::Message,
};

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// How producers for this Reader are discovered.
pub enum Discovery {
    /// A fixed set of `nsqd` addresses, dialled once at construction.
    Static(Vec<String>),
    /// `nsqlookupd` addresses polled periodically (§4.5).
    Lookupd(Vec<String>),
}

struct ProducerEntry {
    connection: Arc<Connection>,
    /// Set the first poll a previously-seen address is missing from the
    /// lookupd result; the entry is only closed once this has stood for a
    /// full poll cycle, absorbing transient lookupd flaps.
    missing_since: Option<Instant>,
}

pub struct Reader {
    topic: String,
    channel: String,
    cfg: Config,
    connections: DashMap<String, ProducerEntry>,
    message_tx: mpsc::Sender<Message>,
    message_rx: StdMutex<Option<mpsc::Receiver<Message>>>,
    lookup: Option<LookupClient>,
    closing: CancellationToken,
}

impl Reader {
    pub async fn start(
        topic: impl Into<String>,
        channel: impl Into<String>,
        discovery: Discovery,
        cfg: Config,
    ) -> Result<Arc<Reader>> {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        let lookup = match &discovery {
            Discovery::Lookupd(_) => Some(LookupClient::new(cfg.timeouts.lookupd_poll)?),
            Discovery::Static(_) => None,
        };

        let reader = Arc::new(Reader {
            topic: topic.into(),
            channel: channel.into(),
            cfg,
            connections: DashMap::new(),
            message_tx,
            message_rx: StdMutex::new(Some(message_rx)),
            lookup,
            closing: CancellationToken::new(),
        });

        match discovery {
            Discovery::Static(addrs) => {
                for addr in addrs {
                    if let Err(e) = reader.dial_and_subscribe(&addr).await {
                        warn!("initial dial of {addr} failed: {e}");
                    }
                }
                reader.rebalance_rdy(0).await;
            },
            Discovery::Lookupd(lookupd_addrs) => {
                tokio::spawn(poll_loop(reader.clone(), lookupd_addrs));
                tokio::spawn(low_rdy_rotation(reader.clone()));
            },
        }

        Ok(reader)
    }

    /// Takes ownership of the fair-merged message stream. Only one caller
    /// may hold it at a time.
    pub fn messages(&self) -> Result<crate::connection::MessageStream> {
        let rx = self
            .message_rx
            .lock()
            .expect("reader message_rx mutex poisoned")
            .take()
            .ok_or_else(|| crate::error::Error::connection("messages() already taken"))?;
        Ok(crate::connection::MessageStream::from_receiver(rx))
    }

    /// Number of producers currently tracked. Mostly a diagnostic/testing
    /// seam; the fair-merged `messages()` stream is the primary interface.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub async fn close(&self) -> Result<()> {
        self.closing.cancel();
        let addrs: Vec<String> =
            self.connections.iter().map(|e| e.key().clone()).collect();
        for addr in addrs {
            if let Some((_, entry)) = self.connections.remove(&addr) {
                let _ = entry.connection.close().await;
            }
        }
        Ok(())
    }

    async fn dial_and_subscribe(&self, addr: &str) -> Result<()> {
        let connection = Connection::open(addr.to_string(), self.cfg.clone()).await?;
        connection.subscribe(self.topic.clone(), self.channel.clone(), 0).await?;

        let mut stream = connection.messages()?;
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        self.connections
            .insert(addr.to_string(), ProducerEntry { connection, missing_since: None });
        Ok(())
    }

    /// Recomputes `RDY` across all live connections per §4.5: an even split
    /// when there are at most `max_in_flight` connections, otherwise a
    /// rotating subset of size `max_in_flight` holding `RDY=1`.
    async fn rebalance_rdy(&self, rotation_offset: usize) {
        let conns: Vec<Arc<Connection>> =
            self.connections.iter().map(|e| e.value().connection.clone()).collect();
        let n = conns.len();
        if n == 0 {
            return;
        }

        let max_in_flight = self.cfg.reader.max_in_flight as usize;

        if n <= max_in_flight {
            let base = (max_in_flight / n) as u32;
            let remainder = max_in_flight % n;
            for (i, conn) in conns.iter().enumerate() {
                let credit = base + if i < remainder { 1 } else { 0 };
                if let Err(e) = conn.set_rdy(credit).await {
                    warn!("failed to set RDY on {}: {e}", conn.addr());
                }
            }
        } else {
            for (i, conn) in conns.iter().enumerate() {
                let active = (i + rotation_offset) % n < max_in_flight;
                if let Err(e) = conn.set_rdy(if active { 1 } else { 0 }).await {
                    warn!("failed to set RDY on {}: {e}", conn.addr());
                }
            }
        }
    }

    async fn reconcile_producers(&self, found: HashSet<String>) {
        for addr in &found {
            if self.connections.contains_key(addr) {
                if let Some(mut entry) = self.connections.get_mut(addr) {
                    entry.missing_since = None;
                }
            } else if let Err(e) = self.dial_and_subscribe(addr).await {
                warn!("failed to dial discovered producer {addr}: {e}");
            }
        }

        let grace = self.cfg.reader.lookupd_poll_interval;
        let mut to_remove = Vec::new();
        for mut entry in self.connections.iter_mut() {
            if found.contains(entry.key()) {
                continue;
            }
            match entry.missing_since {
                Some(since) if since.elapsed() >= grace => to_remove.push(entry.key().clone()),
                Some(_) => {},
                None => entry.missing_since = Some(Instant::now()),
            }
        }

        for addr in to_remove {
            if let Some((_, entry)) = self.connections.remove(&addr) {
                let _ = entry.connection.close().await;
            }
        }

        self.rebalance_rdy(0).await;
    }
}

async fn poll_loop(reader: Arc<Reader>, lookupd_addrs: Vec<String>) {
    let lookup = reader.lookup.clone().expect("lookupd discovery requires a LookupClient");

    loop {
        if reader.closing.is_cancelled() {
            return;
        }

        let found = lookup.lookup_all(&lookupd_addrs, &reader.topic).await;
        reader.reconcile_producers(found).await;

        let jitter = reader.cfg.reader.lookupd_poll_jitter;
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        let delay = Duration::from_secs_f64(
            (reader.cfg.reader.lookupd_poll_interval.as_secs_f64() * factor).max(0.1),
        );

        tokio::select! {
            _ = reader.closing.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

/// Rotates which subset of an over-subscribed producer set holds `RDY=1`,
/// so every producer eventually gets polled instead of starving (§4.5,
/// §10.5).
async fn low_rdy_rotation(reader: Arc<Reader>) {
    let mut offset: usize = 0;
    loop {
        let idle = reader.cfg.reader.low_rdy_idle_timeout;
        tokio::select! {
            _ = reader.closing.cancelled() => return,
            _ = tokio::time::sleep(idle) => {},
        }
        if reader.connections.len() > reader.cfg.reader.max_in_flight as usize {
            offset = offset.wrapping_add(1);
            reader.rebalance_rdy(offset).await;
        }
    }
}
