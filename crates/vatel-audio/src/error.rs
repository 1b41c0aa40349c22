/// Failures of the host audio devices. These stay inside the audio pipelines
/// and degrade to silence or to a stopped stream; they never end a session.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no default {0} device available")]
    NoDevice(&'static str),
    #[error("device {device:?} cannot run at {sample_rate} Hz with i16 or f32 samples")]
    UnsupportedConfig { device: String, sample_rate: u32 },
    #[error("failed to query audio device: {0}")]
    Query(String),
    #[error("failed to build audio stream: {0}")]
    Build(String),
    #[error("failed to start audio stream: {0}")]
    Play(String),
    #[error("failed to stop audio stream: {0}")]
    Pause(String),
}

/// Errors raised while moving audio through the ingress and egress pipelines.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    /// The render side was dropped, so queued audio can no longer be played.
    #[error("playback has stopped")]
    PlaybackClosed,
    #[error(transparent)]
    Device(#[from] DeviceError),
}
