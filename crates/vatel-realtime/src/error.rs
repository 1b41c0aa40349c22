use crate::state::ConnectionState;
use std::time::Duration;
use tokio_tungstenite::tungstenite;
use vatel_types::ProtocolError;

/// Failure to establish the channel. Always terminal for the attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
    #[error("timed out after {0:?} waiting for the websocket handshake")]
    Timeout(Duration),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),
}

/// Errors observed by users of an established session connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// One inbound frame could not be decoded; the connection stays usable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection is not open (state: {0})")]
    NotOpen(ConnectionState),
    #[error("connection is closing")]
    ConnectionClosing,
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("failed to write frame: {0}")]
    Send(#[source] tungstenite::Error),
    /// The inbound stream is exhausted; no further messages will arrive.
    #[error("message stream closed")]
    StreamClosed,
    #[error("transport failure: {0}")]
    Transport(#[source] tungstenite::Error),
    #[error("no pending tool call with id {0:?}")]
    UnknownToolCall(String),
}
