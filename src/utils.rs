// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use rand::Rng;

/// Computes the delay before the `attempt`-th reconnect try (0-indexed),
/// following `min(initial * 2^attempt, max)` jittered by up to ±20%.
pub fn jittered_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = initial.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let base = exp.min(max);

    let jitter_frac = rand::rng().random_range(-0.2..=0.2);
    let secs = base.as_secs_f64() * (1.0 + jitter_frac);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Best-effort local hostname, used as a default `IDENTIFY` field when the
/// caller does not configure one explicitly.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// A default `user_agent` string for the IDENTIFY handshake.
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
