// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The crate-wide error taxonomy.
//!
//! Unlike the lower config/logging layers (which stay on `anyhow`, matching
//! the ambient style this crate was grown from), every public operation on
//! [`crate::connection::Connection`], [`crate::writer::Writer`],
//! [`crate::reader::Reader`] and [`crate::message::Message`] returns this
//! typed `Error` so callers can branch on the failure kind (a `Writer`
//! retries on [`Error::Connection`] but must not retry a `PUB` rejected with
//! [`Error::Protocol`]).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Dial failed, or the socket broke mid-operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation was issued against a connection that is closed or
    /// closing.
    #[error("connection closed")]
    ConnectionClosed,

    /// A malformed frame, an unknown frame type, an oversized frame, or a
    /// server `ERROR` reply. `code` carries the server error token
    /// (`E_BAD_TOPIC`, …) when the error originated from an `ERROR` frame.
    #[error("protocol error: {code}")]
    Protocol { code: String },

    /// IDENTIFY reported `auth_required=true` but no auth secret was
    /// configured.
    #[error("server requires AUTH but no secret was configured")]
    AuthRequired,

    /// The server rejected the `AUTH` command.
    #[error("AUTH failed: {0}")]
    AuthFailed(String),

    /// A server feature negotiated via IDENTIFY (TLS, snappy, deflate) is
    /// not implemented by this core.
    #[error("server demands unsupported transport: {0}")]
    UnsupportedTransport(&'static str),

    /// An nsqlookupd HTTP call failed (non-2xx, timeout, malformed body).
    #[error("lookup error: {0}")]
    Lookup(String),

    /// An ack operation (`FIN`/`REQ`/`TOUCH`) was attempted after the owning
    /// Connection was closed.
    #[error("message's connection is gone")]
    MessageGone,

    /// A second FIN/REQ was attempted on an already-processed message.
    #[error("message was already processed")]
    MessageAlreadyProcessed,

    /// A `TOUCH` was attempted after `msg_timeout` had already elapsed; the
    /// server has likely already requeued the message.
    #[error("message visibility timeout already elapsed")]
    MessageTimedOut,

    /// Every candidate producer address failed in one publish sweep.
    #[error("no connections available")]
    NoConnections,

    /// A request was cancelled locally before it completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn protocol(code: impl Into<String>) -> Self {
        Error::Protocol { code: code.into() }
    }
}
