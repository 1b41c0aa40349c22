//! Vatel Realtime Protocol Types
//!
//! Typed representation of the JSON frames exchanged with the Vatel voice
//! agent over its duplex WebSocket channel, plus the codec that turns wire
//! bytes into [`Message`] values and back.
//!
//! - `message`: the closed set of message kinds and their payload schemas.
//! - `error`: the [`ProtocolError`] returned when a frame cannot be decoded.

pub mod error;
pub mod message;

pub use error::ProtocolError;
pub use message::{
    Direction, InputAudio, InputAudioTranscript, Message, ResponseAudio, ResponseText,
    SessionEnded, SessionStarted, SpeechStarted, ToolCall, ToolCallArgument, ToolCallOutput,
};
