// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single duplex TCP connection to one `nsqd` (§4.2).
//!
//! Shape carried over from the teacher's `ClientConnection`: a serializing
//! write path, a dedicated read-loop task, and a `CancellationToken` pair
//! that separates "stop accepting new work" from "tear everything down now".
//! What changes is the correlation scheme — iSCSI tags every PDU with an
//! Initiator Task Tag and dispatches by ID; NSQ has no such tag, so responses
//! are correlated to commands by strict FIFO order (`pending`) instead of a
//! `DashMap`.

mod common;
pub mod status;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};

use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, warn};

use crate::{
    cfg::{config::Config, enums::AuthConfig},
    codec::FrameCodec,
    command::{self, Command},
    connection::{
        common::{io_with_timeout, op_with_timeout},
        status::{ConnectionStatus, StatusCell},
    },
    error::{Error, Result},
    frame::Frame,
    message::Message,
};

type Transport = Framed<TcpStream, FrameCodec>;

/// `(topic, channel, rdy)` recorded so a reconnect can replay it verbatim.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub topic: String,
    pub channel: String,
    pub rdy: u32,
}

/// The subset of IDENTIFY's response this core cares about (§6); unknown
/// keys are ignored, per the spec. `tls_v1`/`snappy`/`deflate` are parsed
/// only to reject a server that demands them, since none is implemented.
#[derive(Debug, Clone, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    max_rdy_count: Option<i64>,
    #[serde(default)]
    max_msg_timeout: Option<i64>,
    #[serde(default)]
    msg_timeout: Option<i64>,
    #[serde(default)]
    heartbeat_interval: Option<i64>,
    #[serde(default)]
    auth_required: bool,
    #[serde(default)]
    tls_v1: bool,
    #[serde(default)]
    snappy: bool,
    #[serde(default)]
    deflate: bool,
}

/// State belonging to one live socket generation. Replaced wholesale on
/// reconnect; dropping it drains every pending slot with
/// [`Error::ConnectionClosed`] for free (oneshot senders complete their
/// receiver with an error on drop).
struct Live {
    write_tx: mpsc::UnboundedSender<Command>,
    pending: Arc<StdMutex<VecDeque<oneshot::Sender<Result<Bytes>>>>>,
    generation_cancel: CancellationToken,
}

pub struct Connection {
    addr: String,
    cfg: Config,
    status: StatusCell,
    live: StdMutex<Option<Live>>,
    subscription: StdMutex<Option<Subscription>>,
    identify_response: StdMutex<Option<IdentifyResponse>>,
    message_tx: mpsc::Sender<Message>,
    message_rx: StdMutex<Option<mpsc::Receiver<Message>>>,
    /// Cancelled exactly once, by `close()`; distinguishes a deliberate
    /// shutdown from a transport failure the reconnector should handle.
    closing: CancellationToken,
    self_ref: OnceCell<Weak<Connection>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("status", &self.status.get())
            .finish()
    }
}

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

impl Connection {
    /// Dials `addr`, completes the IDENTIFY/AUTH handshake, and — unless
    /// `cfg.reconnect.auto_reconnect` is false — starts a background
    /// supervisor that transparently re-dials on transport loss (§4.3).
    pub async fn open(addr: impl Into<String>, cfg: Config) -> Result<Arc<Connection>> {
        let addr = addr.into();
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        let connection = Arc::new(Connection {
            addr,
            cfg,
            status: StatusCell::new(ConnectionStatus::Init),
            live: StdMutex::new(None),
            subscription: StdMutex::new(None),
            identify_response: StdMutex::new(None),
            message_tx,
            message_rx: StdMutex::new(Some(message_rx)),
            closing: CancellationToken::new(),
            self_ref: OnceCell::new(),
        });
        let _ = connection.self_ref.set(Arc::downgrade(&connection));

        connection.status.set(ConnectionStatus::Connecting);
        connection.connect_once().await?;
        connection.status.set(ConnectionStatus::Connected);

        if connection.cfg.reconnect.auto_reconnect {
            tokio::spawn(crate::reconnect::supervise(Arc::downgrade(&connection)));
        }

        Ok(connection)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn status_receiver(&self) -> tokio::sync::watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Sends `command`, correlating the reply by FIFO position unless the
    /// command is fire-and-forget.
    pub async fn execute(&self, command: Command) -> Result<Bytes> {
        let (write_tx, pending) = {
            let live = self.live.lock().expect("connection live mutex poisoned");
            let live = live.as_ref().ok_or(Error::ConnectionClosed)?;
            (live.write_tx.clone(), live.pending.clone())
        };

        if !command.expects_reply() {
            write_tx.send(command).map_err(|_| Error::ConnectionClosed)?;
            return Ok(Bytes::new());
        }

        let (tx, rx) = oneshot::channel();
        pending.lock().expect("pending queue poisoned").push_back(tx);
        write_tx.send(command).map_err(|_| Error::ConnectionClosed)?;

        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// `SUB topic channel` then `RDY rdy`; on success the subscription is
    /// recorded for reconnect replay and status moves to `Subscribed`.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        channel: impl Into<String>,
        rdy: u32,
    ) -> Result<()> {
        let topic = topic.into();
        let channel = channel.into();

        self.execute(Command::Sub { topic: topic.clone(), channel: channel.clone() }).await?;
        self.execute(Command::Rdy(rdy)).await?;

        *self.subscription.lock().expect("subscription mutex poisoned") =
            Some(Subscription { topic, channel, rdy });
        self.status.set(ConnectionStatus::Subscribed);
        Ok(())
    }

    /// Takes ownership of this connection's inbound message stream. Only one
    /// caller may hold it at a time.
    pub fn messages(&self) -> Result<MessageStream> {
        let rx = self
            .message_rx
            .lock()
            .expect("message_rx mutex poisoned")
            .take()
            .ok_or_else(|| Error::connection("messages() already taken"))?;
        Ok(MessageStream { rx })
    }

    pub fn fin(&self, id: &str) -> Result<()> {
        self.fire_and_forget(Command::Fin(id.to_string()))
    }

    pub fn req(&self, id: &str, timeout_ms: u64) -> Result<()> {
        self.fire_and_forget(Command::Req { id: id.to_string(), timeout_ms })
    }

    pub fn touch(&self, id: &str) -> Result<()> {
        self.fire_and_forget(Command::Touch(id.to_string()))
    }

    /// Updates this connection's `RDY` count and the recorded subscription
    /// snapshot, so a subsequent reconnect replays the latest value rather
    /// than the one from the original `subscribe()` call.
    pub async fn set_rdy(&self, rdy: u32) -> Result<()> {
        self.execute(Command::Rdy(rdy)).await?;
        if let Some(sub) = self.subscription.lock().expect("subscription mutex poisoned").as_mut()
        {
            sub.rdy = rdy;
        }
        Ok(())
    }

    /// Used by `Message::fin`/`req`/`touch` through the `Weak` back-reference
    /// (§9: the Message must not keep the Connection alive).
    pub(crate) fn send_fin(&self, id: &str) -> Result<()> {
        self.fin(id)
    }

    pub(crate) fn send_req(&self, id: &str, timeout_ms: u64) -> Result<()> {
        self.req(id, timeout_ms)
    }

    pub(crate) fn send_touch(&self, id: &str) -> Result<()> {
        self.touch(id)
    }

    fn fire_and_forget(&self, command: Command) -> Result<()> {
        let live = self.live.lock().expect("connection live mutex poisoned");
        let live = live.as_ref().ok_or(Error::ConnectionClosed)?;
        live.write_tx.send(command).map_err(|_| Error::ConnectionClosed)
    }

    pub(crate) fn subscription_snapshot(&self) -> Option<Subscription> {
        self.subscription.lock().expect("subscription mutex poisoned").clone()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub(crate) fn generation_cancel(&self) -> Option<CancellationToken> {
        self.live.lock().expect("connection live mutex poisoned").as_ref().map(|l| l.generation_cancel.clone())
    }

    pub(crate) fn clear_live(&self) {
        *self.live.lock().expect("connection live mutex poisoned") = None;
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.set(status);
    }

    /// `CLS`, await `CLOSE_WAIT` (bounded by `timeouts.cls_drain`), tear the
    /// socket down. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.status.set(ConnectionStatus::Closing);
        self.closing.cancel();

        let live = self.live.lock().expect("connection live mutex poisoned").take();
        if let Some(live) = live {
            let (tx, rx) = oneshot::channel();
            live.pending.lock().expect("pending queue poisoned").push_back(tx);
            let _ = live.write_tx.send(Command::Cls);
            let _ = timeout(self.cfg.timeouts.cls_drain, rx).await;
            live.generation_cancel.cancel();
        }

        self.status.set(ConnectionStatus::Closed);
        Ok(())
    }

    /// Dials, handshakes, and installs a fresh `Live` generation. Used both
    /// by `open()` and by the reconnect supervisor.
    pub(crate) async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let (live, identify) = dial_and_handshake(
            &self.addr,
            &self.cfg,
            Arc::downgrade(self),
            self.message_tx.clone(),
        )
        .await?;

        *self.identify_response.lock().expect("identify_response mutex poisoned") =
            Some(identify);
        *self.live.lock().expect("connection live mutex poisoned") = Some(live);
        Ok(())
    }
}

/// A `futures::Stream` over a connection's inbound messages. Also used by
/// [`crate::reader::Reader`] for its fan-in channel, since both are just a
/// bounded `mpsc::Receiver<Message>` with a `Stream` face.
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
}

impl MessageStream {
    pub(crate) fn from_receiver(rx: mpsc::Receiver<Message>) -> Self {
        MessageStream { rx }
    }
}

impl futures::Stream for MessageStream {
    type Item = Message;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

async fn dial_and_handshake(
    addr: &str,
    cfg: &Config,
    connection: Weak<Connection>,
    message_tx: mpsc::Sender<Message>,
) -> Result<(Live, IdentifyResponse)> {
    let setup_cancel = CancellationToken::new();

    let mut stream = io_with_timeout(
        "dial",
        TcpStream::connect(addr),
        cfg.timeouts.dial,
        &setup_cancel,
    )
    .await?;
    stream.set_nodelay(true).map_err(Error::Io)?;

    io_with_timeout(
        "write magic",
        stream.write_all(command::MAGIC_V2),
        cfg.timeouts.dial,
        &setup_cancel,
    )
    .await?;

    let framed: Transport = Framed::new(stream, FrameCodec);
    let (mut sink, mut source) = framed.split();

    op_with_timeout(
        "IDENTIFY",
        sink.send(Command::Identify(cfg.identify.to_json())),
        cfg.timeouts.identify,
        &setup_cancel,
    )
    .await?;

    let identify: IdentifyResponse = match op_with_timeout(
        "IDENTIFY response",
        recv_frame(&mut source),
        cfg.timeouts.identify,
        &setup_cancel,
    )
    .await?
    {
        Frame::Response(body) => serde_json::from_slice(&body)
            .map_err(|e| Error::protocol(format!("malformed IDENTIFY response: {e}")))?,
        Frame::Error(body) => {
            return Err(Error::protocol(String::from_utf8_lossy(&body).into_owned()));
        },
        Frame::Message(_) => {
            return Err(Error::protocol("server sent MESSAGE before IDENTIFY completed"));
        },
    };

    if identify.tls_v1 {
        return Err(Error::UnsupportedTransport("tls_v1"));
    }
    if identify.snappy {
        return Err(Error::UnsupportedTransport("snappy"));
    }
    if identify.deflate {
        return Err(Error::UnsupportedTransport("deflate"));
    }

    if identify.auth_required && !cfg.auth.is_configured() {
        return Err(Error::AuthRequired);
    }

    if let AuthConfig::Secret { secret } = &cfg.auth {
        op_with_timeout(
            "AUTH",
            sink.send(Command::Auth(Bytes::from(secret.clone().into_bytes()))),
            cfg.timeouts.identify,
            &setup_cancel,
        )
        .await?;

        match op_with_timeout(
            "AUTH response",
            recv_frame(&mut source),
            cfg.timeouts.identify,
            &setup_cancel,
        )
        .await?
        {
            Frame::Response(_) => {},
            Frame::Error(body) => {
                return Err(Error::AuthFailed(String::from_utf8_lossy(&body).into_owned()));
            },
            Frame::Message(_) => {
                return Err(Error::protocol("server sent MESSAGE before AUTH completed"));
            },
        }
    }

    let (write_tx, write_rx) = mpsc::unbounded_channel::<Command>();
    let pending = Arc::new(StdMutex::new(VecDeque::new()));
    let generation_cancel = CancellationToken::new();

    let msg_timeout = Duration::from_millis(
        identify.msg_timeout.filter(|v| *v > 0).unwrap_or(60_000) as u64,
    );
    let heartbeat_interval = identify
        .heartbeat_interval
        .filter(|v| *v > 0)
        .map(|ms| Duration::from_millis(ms as u64));

    tokio::spawn(read_loop(
        source,
        pending.clone(),
        message_tx,
        write_tx.clone(),
        msg_timeout,
        heartbeat_interval,
        connection,
        generation_cancel.clone(),
    ));
    tokio::spawn(write_loop(sink, write_rx, generation_cancel.clone()));

    Ok((Live { write_tx, pending, generation_cancel }, identify))
}

async fn recv_frame(
    source: &mut SplitStream<Transport>,
) -> Result<Frame> {
    match source.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(e),
        None => Err(Error::ConnectionClosed),
    }
}

/// Demultiplexes inbound frames into the pending-response queue and the
/// message channel (§4.2), answering heartbeats autonomously.
async fn read_loop(
    mut source: SplitStream<Transport>,
    pending: Arc<StdMutex<VecDeque<oneshot::Sender<Result<Bytes>>>>>,
    message_tx: mpsc::Sender<Message>,
    write_tx: mpsc::UnboundedSender<Command>,
    msg_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    connection: Weak<Connection>,
    generation_cancel: CancellationToken,
) {
    let watchdog = heartbeat_interval.map(|d| d.saturating_mul(2));

    loop {
        let next = match watchdog {
            Some(watchdog) => tokio::select! {
                _ = generation_cancel.cancelled() => return,
                res = timeout(watchdog, source.next()) => res,
            },
            None => tokio::select! {
                _ = generation_cancel.cancelled() => return,
                item = source.next() => Ok(item),
            },
        };

        let frame = match next {
            Err(_) => {
                warn!("heartbeat watchdog expired; connection presumed dead");
                break;
            },
            Ok(None) => {
                debug!("connection closed by peer");
                break;
            },
            Ok(Some(Err(e))) => {
                warn!("frame decode error: {e}");
                break;
            },
            Ok(Some(Ok(frame))) => frame,
        };

        if frame.is_heartbeat() {
            let _ = write_tx.send(Command::Nop);
            continue;
        }

        match frame {
            Frame::Response(body) => complete_pending(&pending, Ok(body)),
            Frame::Error(body) => complete_pending(
                &pending,
                Err(Error::protocol(String::from_utf8_lossy(&body).into_owned())),
            ),
            Frame::Message(raw) => {
                let message = Message::new(raw, msg_timeout, connection.clone());
                if message_tx.send(message).await.is_err() {
                    break;
                }
            },
        }
    }

    generation_cancel.cancel();
    if let Some(connection) = connection.upgrade()
        && !connection.is_closing()
    {
        connection.set_status(ConnectionStatus::Reconnecting);
    }
}

fn complete_pending(
    pending: &StdMutex<VecDeque<oneshot::Sender<Result<Bytes>>>>,
    result: Result<Bytes>,
) {
    let slot = pending.lock().expect("pending queue poisoned").pop_front();
    match slot {
        Some(tx) => {
            let _ = tx.send(result);
        },
        None => warn!("RESPONSE/ERROR frame with no pending command; protocol violation"),
    }
}

async fn write_loop(
    mut sink: SplitSink<Transport, Command>,
    mut write_rx: mpsc::UnboundedReceiver<Command>,
    generation_cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = generation_cancel.cancelled() => break,
            cmd = write_rx.recv() => {
                match cmd {
                    None => break,
                    Some(cmd) => {
                        if let Err(e) = sink.send(cmd).await {
                            warn!("write failed: {e}");
                            break;
                        }
                    },
                }
            }
        }
    }
    generation_cancel.cancel();
}
