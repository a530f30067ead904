// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An inbound message and its ack path (§3, §4.7, §9).
//!
//! A `Message` holds a non-owning `Weak` reference to the `Connection` that
//! delivered it, mirroring the teacher's `SessionRef` (a `Weak<Pool>` plus a
//! TSIH/CID pair held by a `ClientConnection` for unsolicited NOP-In
//! replies): the message must not keep the connection alive, and after the
//! connection is gone its ack operations fail fast instead of reviving the
//! socket.

use std::{
    sync::{
        Mutex as StdMutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{
    connection::Connection,
    error::{Error, Result},
    frame::RawMessage,
};

/// An inbound message delivered over a subscription.
#[derive(Debug)]
pub struct Message {
    pub id: String,
    pub body: Bytes,
    pub attempts: u16,
    pub timestamp: u64,
    initialized_at: StdMutex<Instant>,
    msg_timeout: Duration,
    is_processed: AtomicBool,
    connection: Weak<Connection>,
}

impl Message {
    pub(crate) fn new(raw: RawMessage, msg_timeout: Duration, connection: Weak<Connection>) -> Self {
        Message {
            id: raw.id,
            body: raw.body,
            attempts: raw.attempts,
            timestamp: raw.timestamp_ns,
            initialized_at: StdMutex::new(Instant::now()),
            msg_timeout,
            is_processed: AtomicBool::new(false),
            connection,
        }
    }

    /// Whether `msg_timeout` has elapsed since this message was received (or
    /// last touched), making the server likely to have already requeued it.
    pub fn is_timed_out(&self) -> bool {
        self.initialized_at
            .lock()
            .expect("initialized_at mutex poisoned")
            .elapsed()
            >= self.msg_timeout
    }

    pub fn is_processed(&self) -> bool {
        self.is_processed.load(Ordering::Acquire)
    }

    /// Acknowledges successful processing.
    pub fn fin(&self) -> Result<()> {
        self.mark_processed()?;
        self.connection()?.send_fin(&self.id)
    }

    /// Requeues the message, optionally after `timeout_ms`.
    pub fn req(&self, timeout_ms: u64) -> Result<()> {
        self.mark_processed()?;
        self.connection()?.send_req(&self.id, timeout_ms)
    }

    /// Requeues with a delay computed from the attempt count, following a
    /// jittered exponential backoff rather than a fixed delay.
    pub fn requeue_with_backoff(
        &self,
        initial: Duration,
        max: Duration,
    ) -> Result<()> {
        let delay = crate::utils::jittered_backoff(self.attempts.into(), initial, max);
        self.req(delay.as_millis() as u64)
    }

    /// Resets the server-side visibility timeout without acking. Valid only
    /// while the message is neither processed nor already timed out.
    pub fn touch(&self) -> Result<()> {
        if self.is_processed() {
            return Err(Error::MessageAlreadyProcessed);
        }
        if self.is_timed_out() {
            return Err(Error::MessageTimedOut);
        }
        self.connection()?.send_touch(&self.id)?;
        *self.initialized_at.lock().expect("initialized_at mutex poisoned") = Instant::now();
        Ok(())
    }

    fn mark_processed(&self) -> Result<()> {
        if self.is_processed.swap(true, Ordering::AcqRel) {
            return Err(Error::MessageAlreadyProcessed);
        }
        Ok(())
    }

    fn connection(&self) -> Result<std::sync::Arc<Connection>> {
        self.connection.upgrade().ok_or(Error::MessageGone)
    }
}
