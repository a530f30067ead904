// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Authentication strategy advertised to the server after IDENTIFY.
///
/// `None` never sends `AUTH`; `Secret` sends it once, immediately after a
/// successful IDENTIFY exchange, using the configured shared secret.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "method")]
pub enum AuthConfig {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "secret")]
    Secret { secret: String },
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        !matches!(self, AuthConfig::None)
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthConfig::None => "none",
            AuthConfig::Secret { .. } => "secret",
        })
    }
}
