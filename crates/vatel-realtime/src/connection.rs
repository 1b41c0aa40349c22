//! Manages the WebSocket channel of one voice session.
//!
//! The channel is split in two: [`Connection`] keeps the read half and is
//! owned by the single reader (the session read loop), while any number of
//! [`ConnectionHandle`] clones share the write half behind an async mutex so
//! that frames from concurrent senders are never interleaved.

use crate::{
    config::ConnectConfig,
    error::{ConnectError, SessionError},
    state::ConnectionState,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::SecretString;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, timeout, timeout_at},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, protocol::Message as WsMessage},
};
use tracing::{debug, info, trace, warn};
use vatel_types::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a session channel, presenting `token` as the `token` query parameter.
///
/// The handshake is bounded by [`ConnectConfig::open_timeout`]; on success the
/// returned connection is [`ConnectionState::Open`].
pub async fn connect(
    config: &ConnectConfig,
    token: &SecretString,
) -> Result<Connection, ConnectError> {
    let endpoint = config.endpoint()?;
    let url = config.connection_url(token)?;
    let (state_tx, _) = watch::channel(ConnectionState::Connecting);
    info!(%endpoint, "Connecting to session channel.");

    let ws_stream = match timeout(config.open_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            state_tx.send_replace(ConnectionState::Closed);
            return Err(ConnectError::Handshake(e));
        }
        Err(_) => {
            state_tx.send_replace(ConnectionState::Closed);
            return Err(ConnectError::Timeout(config.open_timeout));
        }
    };
    state_tx.send_replace(ConnectionState::Open);
    info!(%endpoint, "Session channel open.");

    Ok(Connection::from_stream(ws_stream, state_tx, config))
}

struct Shared {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    state: watch::Sender<ConnectionState>,
    /// Set when this side started the close handshake.
    closed_locally: AtomicBool,
    close_timeout: Duration,
}

/// Cloneable write side of a session connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Serializes `message` and writes it as one text frame.
    ///
    /// Only valid while the connection is open; concurrent calls are written
    /// one whole frame at a time.
    pub async fn send(&self, message: Message) -> Result<(), SessionError> {
        self.ensure_open()?;
        trace!(tag = message.tag(), "Sending message.");
        self.write(WsMessage::Text(message.to_json().into())).await
    }

    /// Starts the close handshake. Idempotent.
    ///
    /// Returns once the connection is [`ConnectionState::Closed`]. The close
    /// frame gets at most the configured close timeout; after that the
    /// transport is abandoned.
    pub async fn close(&self) {
        self.close_until(Instant::now() + self.shared.close_timeout)
            .await;
    }

    async fn close_until(&self, deadline: Instant) {
        let initiated = self.shared.state.send_if_modified(|state| {
            if *state < ConnectionState::Closing {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });

        if initiated {
            self.shared.closed_locally.store(true, Ordering::Release);
        } else {
            // Another caller owns the handshake; wait for it to finish.
            let mut state_rx = self.shared.state.subscribe();
            let finished = timeout_at(
                deadline,
                state_rx.wait_for(|state| *state == ConnectionState::Closed),
            )
            .await
            .is_ok();
            if !finished {
                self.mark_closed();
            }
            return;
        }

        debug!("Closing session channel.");
        let closed = timeout_at(deadline, async {
            let mut sink = self.shared.sink.lock().await;
            sink.close().await
        })
        .await;
        match closed {
            Ok(Ok(())) => debug!("Close frame sent."),
            Ok(Err(e)) => debug!(error = %e, "Close frame could not be delivered."),
            Err(_) => warn!(
                timeout = ?self.shared.close_timeout,
                "Close handshake timed out; dropping transport."
            ),
        }
        self.mark_closed();
        info!("Session channel closed.");
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closing => Err(SessionError::ConnectionClosing),
            ConnectionState::Closed => Err(SessionError::ConnectionClosed),
            state @ ConnectionState::Connecting => Err(SessionError::NotOpen(state)),
        }
    }

    async fn write(&self, frame: WsMessage) -> Result<(), SessionError> {
        let mut sink = self.shared.sink.lock().await;
        // Close may have started while this sender waited for the lock.
        self.ensure_open()?;
        match sink.send(frame).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.mark_closed();
                Err(SessionError::ConnectionClosed)
            }
            Err(e) => Err(SessionError::Send(e)),
        }
    }

    fn mark_closed(&self) {
        self.shared.state.send_replace(ConnectionState::Closed);
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

/// Read side of a session connection plus a handle to its write side.
pub struct Connection {
    handle: ConnectionHandle,
    stream: SplitStream<WsStream>,
    state_rx: watch::Receiver<ConnectionState>,
    exhausted: bool,
    keepalive: Option<JoinHandle<()>>,
}

impl Connection {
    fn from_stream(
        ws_stream: WsStream,
        state: watch::Sender<ConnectionState>,
        config: &ConnectConfig,
    ) -> Self {
        let (sink, stream) = ws_stream.split();
        let handle = ConnectionHandle {
            shared: Arc::new(Shared {
                sink: Mutex::new(sink),
                state,
                closed_locally: AtomicBool::new(false),
                close_timeout: config.close_timeout,
            }),
        };
        let keepalive = config
            .ping_interval
            .map(|every| spawn_keepalive(handle.clone(), every));
        Self {
            state_rx: handle.subscribe(),
            handle,
            stream,
            exhausted: false,
            keepalive,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub async fn send(&self, message: Message) -> Result<(), SessionError> {
        self.handle.send(message).await
    }

    /// Waits for the next inbound message.
    ///
    /// A frame that fails to decode is returned as [`SessionError::Protocol`]
    /// and the stream stays usable. Once the peer closes the channel this
    /// returns [`SessionError::StreamClosed`] for good. A receive pending while
    /// the connection is closed locally also ends with `StreamClosed`; once
    /// that local close has completed, every call fails with
    /// [`SessionError::ConnectionClosed`].
    pub async fn receive(&mut self) -> Result<Message, SessionError> {
        loop {
            if self.state() == ConnectionState::Closed
                && self.handle.shared.closed_locally.load(Ordering::Acquire)
            {
                return Err(SessionError::ConnectionClosed);
            }
            if self.exhausted {
                return Err(SessionError::StreamClosed);
            }
            match self.state() {
                ConnectionState::Closed => return Err(SessionError::ConnectionClosed),
                ConnectionState::Closing => return Err(SessionError::StreamClosed),
                ConnectionState::Connecting | ConnectionState::Open => {}
            }

            let next = tokio::select! {
                biased;
                frame = self.stream.next() => frame,
                _ = self.state_rx.wait_for(|state| *state >= ConnectionState::Closing) => {
                    debug!("Receive interrupted by local close.");
                    return Err(SessionError::StreamClosed);
                }
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    return Message::parse(text.as_bytes()).map_err(SessionError::from);
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return Message::parse(&data).map_err(SessionError::from);
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Peer closed the session channel.");
                    self.exhausted = true;
                    self.handle.mark_closed();
                    return Err(SessionError::StreamClosed);
                }
                // Pings are answered by the transport itself.
                Some(Ok(_)) => continue,
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => {
                    self.exhausted = true;
                    self.handle.mark_closed();
                    return Err(SessionError::StreamClosed);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Session channel failed.");
                    self.exhausted = true;
                    self.handle.mark_closed();
                    return Err(SessionError::Transport(e));
                }
            }
        }
    }

    /// Closes the channel and waits, within the close timeout, for the peer
    /// to acknowledge. Idempotent.
    pub async fn close(&mut self) {
        let deadline = Instant::now() + self.handle.shared.close_timeout;
        self.handle.close_until(deadline).await;
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        if self.exhausted {
            return;
        }
        // Read until the peer's close reply so the handshake completes cleanly.
        let drained = timeout_at(deadline, async {
            while let Some(Ok(frame)) = self.stream.next().await {
                if frame.is_close() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("Peer did not acknowledge close in time.");
        }
        self.exhausted = true;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}

fn spawn_keepalive(handle: ConnectionHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state_rx = handle.subscribe();
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = handle.write(WsMessage::Ping(Vec::new().into())).await {
                        debug!(error = %e, "Keepalive stopped.");
                        break;
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow() != ConnectionState::Open {
                        break;
                    }
                }
            }
        }
    })
}
