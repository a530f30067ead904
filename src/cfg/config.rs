// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    cfg::enums::AuthConfig,
    utils::{default_user_agent, local_hostname},
};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Fields sent at handshake time via `IDENTIFY` (§3).
    pub identify: IdentifyConfig,
    /// Dial / handshake / drain / poll deadlines (§5).
    pub timeouts: TimeoutsConfig,
    /// Reconnect supervisor knobs (§4.3).
    pub reconnect: ReconnectConfig,
    /// Defaults applied by every `Reader` unless overridden per call (§4.5).
    pub reader: ReaderDefaultsConfig,
    /// Auth strategy run immediately after a successful IDENTIFY.
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IdentifyConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Milliseconds between expected heartbeats; `-1` disables them.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: i64,
    #[serde(default)]
    pub output_buffer_size: Option<u32>,
    #[serde(default)]
    pub output_buffer_timeout: Option<u32>,
    /// Percentage (0-99) of messages the server should sample down to.
    #[serde(default)]
    pub sample_rate: u8,
    /// Per-message visibility timeout in milliseconds, overriding the
    /// server's own default for this connection.
    #[serde(default)]
    pub msg_timeout: Option<u32>,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        IdentifyConfig {
            client_id: None,
            hostname: None,
            user_agent: None,
            heartbeat_interval: default_heartbeat_interval(),
            output_buffer_size: None,
            output_buffer_timeout: None,
            sample_rate: 0,
            msg_timeout: None,
        }
    }
}

impl IdentifyConfig {
    /// Builds the JSON body sent with `IDENTIFY`. The transport toggles are
    /// not configurable: this core never negotiates TLS/snappy/deflate.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "client_id": self.client_id.clone().unwrap_or_default(),
            "hostname": self.hostname.clone().unwrap_or_else(local_hostname),
            "user_agent": self.user_agent.clone().unwrap_or_else(default_user_agent),
            "heartbeat_interval": self.heartbeat_interval,
            "output_buffer_size": self.output_buffer_size,
            "output_buffer_timeout": self.output_buffer_timeout,
            "sample_rate": self.sample_rate,
            "msg_timeout": self.msg_timeout,
            "feature_negotiation": true,
            "tls_v1": false,
            "snappy": false,
            "deflate": false,
        })
    }
}

fn default_heartbeat_interval() -> i64 {
    30_000
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimeoutsConfig {
    #[serde(with = "serde_secs")]
    pub dial: Duration,
    #[serde(with = "serde_secs")]
    pub identify: Duration,
    #[serde(with = "serde_secs")]
    pub cls_drain: Duration,
    #[serde(with = "serde_secs")]
    pub lookupd_poll: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            dial: Duration::from_secs(5),
            identify: Duration::from_secs(5),
            cls_drain: Duration::from_secs(1),
            lookupd_poll: Duration::from_secs(2),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReconnectConfig {
    pub auto_reconnect: bool,
    #[serde(with = "serde_secs")]
    pub initial_delay: Duration,
    #[serde(with = "serde_secs")]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            auto_reconnect: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReaderDefaultsConfig {
    pub max_in_flight: u32,
    #[serde(with = "serde_secs")]
    pub lookupd_poll_interval: Duration,
    pub lookupd_poll_jitter: f64,
    #[serde(with = "serde_secs")]
    pub low_rdy_idle_timeout: Duration,
}

impl Default for ReaderDefaultsConfig {
    fn default() -> Self {
        ReaderDefaultsConfig {
            max_in_flight: 1,
            lookupd_poll_interval: Duration::from_secs(60),
            lookupd_poll_jitter: 0.3,
            low_rdy_idle_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants called out in §3/§5 and normalizes derived
    /// fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.identify.sample_rate <= 99,
            "identify.sample_rate must be in 0..=99"
        );
        ensure!(
            self.identify.heartbeat_interval == -1 || self.identify.heartbeat_interval >= 1000,
            "identify.heartbeat_interval must be -1 or >= 1000ms"
        );
        ensure!(
            self.reader.max_in_flight >= 1,
            "reader.max_in_flight must be >= 1"
        );
        ensure!(
            (0.0..1.0).contains(&self.reader.lookupd_poll_jitter),
            "reader.lookupd_poll_jitter must be in [0, 1)"
        );
        if let AuthConfig::Secret { secret } = &self.auth {
            ensure!(!secret.is_empty(), "auth.secret must not be empty when configured");
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
