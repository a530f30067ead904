// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The `nsqlookupd` discovery client (§4.6), grounded on the wider NSQ
//! client ecosystem's use of a plain HTTP client rather than a hand-rolled
//! one — the teacher has no HTTP surface of its own to imitate here.

use std::{collections::HashSet, time::Duration};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    producers: Vec<Producer>,
}

#[derive(Debug, Deserialize)]
struct Producer {
    broadcast_address: String,
    tcp_port: u16,
}

#[derive(Debug, Clone)]
pub struct LookupClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl LookupClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Lookup(e.to_string()))?;
        Ok(LookupClient { http, timeout })
    }

    /// Queries one `nsqlookupd` address for producers of `topic`. A 404
    /// (`TOPIC_NOT_FOUND`) is a normal, empty result rather than an error.
    pub async fn lookup(&self, lookupd_addr: &str, topic: &str) -> Result<HashSet<String>> {
        let url = format!("http://{lookupd_addr}/lookup?topic={topic}");

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Lookup(format!("{lookupd_addr}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(HashSet::new());
        }
        if !response.status().is_success() {
            return Err(Error::Lookup(format!(
                "{lookupd_addr}: unexpected status {}",
                response.status()
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::Lookup(format!("{lookupd_addr}: malformed body: {e}")))?;

        Ok(body
            .producers
            .into_iter()
            .map(|p| format!("{}:{}", p.broadcast_address, p.tcp_port))
            .collect())
    }

    /// Queries every address and unions the producer sets. A lookupd that
    /// fails is logged and skipped rather than poisoning the whole call.
    pub async fn lookup_all(
        &self,
        lookupd_addrs: &[String],
        topic: &str,
    ) -> HashSet<String> {
        let mut producers = HashSet::new();
        for addr in lookupd_addrs {
            match self.lookup(addr, topic).await {
                Ok(found) => producers.extend(found),
                Err(e) => tracing::warn!("lookupd poll of {addr} failed: {e}"),
            }
        }
        producers
    }
}
