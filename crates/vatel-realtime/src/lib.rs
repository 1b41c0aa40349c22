//! Vatel Realtime Connection
//!
//! Owns the single WebSocket channel of a voice session: the handshake, the
//! `Connecting → Open → Closing → Closed` lifecycle, serialized sends and the
//! decoded inbound message stream.
//!
//! - `config`: connection endpoint and timeouts.
//! - `connection`: [`Connection`] (read side, owned by one reader) and the
//!   cloneable [`ConnectionHandle`] (write side and lifecycle control).
//! - `sink`: the [`MessageSink`] seam that audio and tool pipelines send through.

pub mod config;
pub mod connection;
pub mod error;
pub mod sink;
pub mod state;

pub use config::{CONNECTION_PATH, ConnectConfig, DEFAULT_WS_BASE};
pub use connection::{Connection, ConnectionHandle, connect};
pub use error::{ConnectError, SessionError};
pub use sink::MessageSink;
pub use state::ConnectionState;

pub use secrecy::SecretString;
pub use vatel_types as types;
