// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Races `fut` against `io_timeout` and `cancel`, the same three-way race the
/// teacher runs around every blocking socket call.
pub(super) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => Err(Error::connection(format!("{label} timed out"))),
            }
        }
    }
}

/// Same race, for futures that already resolve to our own [`Error`] (the
/// codec's `Framed` send/next calls) rather than `std::io::Error`.
pub(super) async fn op_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    op_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = timeout(op_timeout, fut) => {
            match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::connection(format!("{label} timed out"))),
            }
        }
    }
}
