// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Producer facade (§4.4): a pool of [`Connection`]s keyed by `nsqd`
//! address, dialled lazily, with round-robin publish fallback across
//! configured addresses.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

use crate::{
    cfg::config::Config,
    command::Command,
    connection::Connection,
    error::{Error, Result},
};

pub struct Writer {
    addrs: Vec<String>,
    cfg: Config,
    connections: DashMap<String, Arc<Connection>>,
    next: AtomicUsize,
}

impl Writer {
    pub fn new(addrs: Vec<String>, cfg: Config) -> Self {
        Writer { addrs, cfg, connections: DashMap::new(), next: AtomicUsize::new(0) }
    }

    pub async fn publish(&self, topic: &str, body: Bytes) -> Result<()> {
        self.publish_command(Command::Pub { topic: topic.to_string(), body }).await
    }

    pub async fn mpub(&self, topic: &str, bodies: Vec<Bytes>) -> Result<()> {
        self.publish_command(Command::Mpub { topic: topic.to_string(), bodies }).await
    }

    pub async fn dpub(&self, topic: &str, delay_ms: u64, body: Bytes) -> Result<()> {
        self.publish_command(Command::Dpub { topic: topic.to_string(), delay_ms, body })
            .await
    }

    pub async fn close(&self) -> Result<()> {
        for entry in self.connections.iter() {
            let _ = entry.value().close().await;
        }
        Ok(())
    }

    /// Tries each configured address once, starting from the next one in
    /// round-robin order, dialling lazily on first use. Fails with
    /// [`Error::NoConnections`] only if every address fails in this sweep.
    async fn publish_command(&self, command: Command) -> Result<()> {
        if self.addrs.is_empty() {
            return Err(Error::NoConnections);
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.addrs.len();

        for offset in 0..self.addrs.len() {
            let addr = &self.addrs[(start + offset) % self.addrs.len()];
            match self.connection_for(addr).await {
                Ok(conn) => match conn.execute(command.clone()).await {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        warn!("publish via {addr} failed, trying next address: {e}");
                        self.connections.remove(addr);
                    },
                },
                Err(e) => warn!("dial {addr} failed: {e}"),
            }
        }

        Err(Error::NoConnections)
    }

    async fn connection_for(&self, addr: &str) -> Result<Arc<Connection>> {
        if let Some(conn) = self.connections.get(addr) {
            if conn.status().is_live() {
                return Ok(conn.clone());
            }
        }

        let conn = Connection::open(addr.to_string(), self.cfg.clone()).await?;
        self.connections.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }
}
