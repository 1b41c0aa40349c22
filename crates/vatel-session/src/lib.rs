//! Session orchestration for Vatel voice agents.
//!
//! A [`Session`] owns an open [`vatel_realtime::Connection`] and routes what
//! the agent sends: audio to playback, tool calls to a [`ToolHandler`],
//! everything else to the [`SessionEvent`] stream. It also owns shutdown, so
//! captured audio is flushed and playback drains on every exit path.

pub mod orchestrator;
pub mod tools;

pub use orchestrator::{
    DEFAULT_DRAIN_GRACE, DEFAULT_TOOL_GRACE, EndReason, MalformedFramePolicy, Session,
    SessionAudio, SessionConfig, SessionEvent, SessionSummary,
};
pub use tools::{
    DEFAULT_TOOL_OUTPUT, ToolCallCoordinator, ToolCallRequest, ToolHandler, ToolRegistry,
};
