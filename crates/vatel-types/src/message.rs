//! Defines the message protocol spoken over the voice-session channel.
//!
//! Every frame is a JSON object `{"type": <tag>, "data": <payload>}`. The tag
//! selects exactly one payload schema; tags without a payload omit `data`.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// The agent acknowledged the connection and opened a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionStarted {
    #[serde(rename = "id")]
    pub session_id: String,
}

/// The agent ended the session. The payload itself is optional on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnded {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A chunk of the agent's textual response for one turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResponseText {
    pub turn_id: String,
    pub text: String,
}

/// A transcript of the caller's speech.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InputAudioTranscript {
    pub transcript: String,
}

/// A chunk of the agent's voice: base64 PCM16, 24 kHz, mono.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResponseAudio {
    pub turn_id: String,
    pub audio: String,
}

/// A chunk of captured caller audio: base64 PCM16, 24 kHz, mono.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InputAudio {
    pub audio: String,
}

/// Voice activity detected on the caller side.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechStarted {
    /// Set when the server synthesized the event rather than detecting speech.
    #[serde(default)]
    pub emulated: bool,
}

/// One entry of a tool call's ordered argument list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// The agent asks the client to run a tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Vec<ToolCallArgument>,
}

/// The client's answer to a [`ToolCall`], correlated by `tool_call_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Which side of the channel originates a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the agent, received by this client.
    Inbound,
    /// Sent by this client.
    Outbound,
}

/// Every message that can travel over the session channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SessionStarted(SessionStarted),
    SessionEnded(SessionEnded),
    Interruption,
    ResponseText(ResponseText),
    InputAudioTranscript(InputAudioTranscript),
    ResponseAudio(ResponseAudio),
    InputAudio(InputAudio),
    SpeechStarted(SpeechStarted),
    SpeechStopped,
    ToolCall(ToolCall),
    ToolCallOutput(ToolCallOutput),
}

/// Envelope used only to pull the tag out before the payload is validated.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Serialize)]
struct Frame<'a, T: Serialize> {
    #[serde(rename = "type")]
    tag: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

impl Message {
    /// Decodes one wire frame.
    ///
    /// Fails with [`ProtocolError::UnknownType`] when the tag is not part of
    /// the protocol, and with [`ProtocolError::Malformed`] when the frame is
    /// not JSON, has no tag, or its payload does not fit the tag's schema.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let RawFrame { tag, data } = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed(format!("invalid frame envelope: {e}")))?;

        let message = match tag.as_str() {
            "session_started" => Message::SessionStarted(required(&tag, data)?),
            "session_ended" => Message::SessionEnded(optional(&tag, data)?),
            "interruption" => Message::Interruption,
            "response_text" => Message::ResponseText(required(&tag, data)?),
            "input_audio_transcript" => Message::InputAudioTranscript(required(&tag, data)?),
            "response_audio" => Message::ResponseAudio(required(&tag, data)?),
            "input_audio" => Message::InputAudio(required(&tag, data)?),
            "speech_started" => Message::SpeechStarted(optional(&tag, data)?),
            "speech_stopped" => Message::SpeechStopped,
            "tool_call" => Message::ToolCall(required(&tag, data)?),
            "tool_call_output" => Message::ToolCallOutput(required(&tag, data)?),
            _ => return Err(ProtocolError::UnknownType(tag)),
        };
        Ok(message)
    }

    /// Encodes the message as a single JSON text frame.
    ///
    /// Absent optional fields are left out of the frame rather than sent as
    /// `null`; payload-less kinds are encoded as `{"type": <tag>}`.
    pub fn to_json(&self) -> String {
        let tag = self.tag();
        match self {
            Message::SessionStarted(p) => encode(tag, Some(p)),
            Message::SessionEnded(p) => encode(tag, p.reason.as_ref().map(|_| p)),
            Message::Interruption | Message::SpeechStopped => encode::<()>(tag, None),
            Message::ResponseText(p) => encode(tag, Some(p)),
            Message::InputAudioTranscript(p) => encode(tag, Some(p)),
            Message::ResponseAudio(p) => encode(tag, Some(p)),
            Message::InputAudio(p) => encode(tag, Some(p)),
            Message::SpeechStarted(p) => encode(tag, Some(p)),
            Message::ToolCall(p) => encode(tag, Some(p)),
            Message::ToolCallOutput(p) => encode(tag, Some(p)),
        }
    }

    /// The wire tag of this message kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::SessionStarted(_) => "session_started",
            Message::SessionEnded(_) => "session_ended",
            Message::Interruption => "interruption",
            Message::ResponseText(_) => "response_text",
            Message::InputAudioTranscript(_) => "input_audio_transcript",
            Message::ResponseAudio(_) => "response_audio",
            Message::InputAudio(_) => "input_audio",
            Message::SpeechStarted(_) => "speech_started",
            Message::SpeechStopped => "speech_stopped",
            Message::ToolCall(_) => "tool_call",
            Message::ToolCallOutput(_) => "tool_call_output",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Message::InputAudio(_) | Message::ToolCallOutput(_) => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }

    /// Builds an outbound audio message from an already-encoded payload.
    pub fn input_audio(audio: impl Into<String>) -> Self {
        Message::InputAudio(InputAudio {
            audio: audio.into(),
        })
    }

    /// Builds the outbound answer to a tool call.
    pub fn tool_call_output(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Message::ToolCallOutput(ToolCallOutput {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
        })
    }
}

fn required<T: DeserializeOwned>(tag: &str, data: Option<Value>) -> Result<T, ProtocolError> {
    let data = data.ok_or_else(|| ProtocolError::malformed(tag, "missing `data` payload"))?;
    serde_json::from_value(data).map_err(|e| ProtocolError::malformed(tag, e))
}

fn optional<T: DeserializeOwned + Default>(
    tag: &str,
    data: Option<Value>,
) -> Result<T, ProtocolError> {
    match data {
        Some(data) => serde_json::from_value(data).map_err(|e| ProtocolError::malformed(tag, e)),
        None => Ok(T::default()),
    }
}

fn encode<T: Serialize>(tag: &'static str, data: Option<&T>) -> String {
    // Payloads are plain structs with string keys, so serialization is infallible.
    serde_json::to_string(&Frame { tag, data }).expect("message frames always serialize")
}
