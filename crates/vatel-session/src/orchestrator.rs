//! Drives one session: routes inbound messages and owns shutdown order.

use crate::tools::{DEFAULT_TOOL_OUTPUT, ToolCallCoordinator, ToolHandler};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use vatel_audio::{AudioDevice, CaptureHandle, EgressSink, IngressConsumer, IngressReport};
use vatel_realtime::{Connection, ConnectionHandle, SessionError};
use vatel_types::{Direction, Message};

/// Grace period for playback to drain after the session ends.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(400);
/// How long outstanding tool calls may still run once the session ends.
pub const DEFAULT_TOOL_GRACE: Duration = Duration::from_secs(2);

/// What to do with an inbound frame that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedFramePolicy {
    /// Log it and keep reading.
    #[default]
    Skip,
    /// End the session.
    Terminate,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub malformed_policy: MalformedFramePolicy,
    pub drain_grace: Duration,
    /// Tool calls still running after this are abandoned without an answer.
    pub tool_grace: Duration,
    pub tool_fallback_output: String,
    /// Drop unplayed agent audio when the agent reports an interruption.
    pub flush_on_interruption: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            malformed_policy: MalformedFramePolicy::default(),
            drain_grace: DEFAULT_DRAIN_GRACE,
            tool_grace: DEFAULT_TOOL_GRACE,
            tool_fallback_output: DEFAULT_TOOL_OUTPUT.to_string(),
            flush_on_interruption: false,
        }
    }
}

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { session_id: String },
    ResponseText { turn_id: String, text: String },
    Transcript { transcript: String },
    ToolCall { tool_call_id: String, tool_name: String },
    Interruption,
    SpeechStarted { emulated: bool },
    SpeechStopped,
    /// An inbound frame was dropped under [`MalformedFramePolicy::Skip`].
    FrameSkipped { error: String },
    Ended { reason: Option<String> },
}

/// Why the read loop stopped.
#[derive(Debug)]
pub enum EndReason {
    /// The agent sent `session_ended`.
    SessionEnded { reason: Option<String> },
    /// The channel closed, from either side.
    StreamClosed,
    /// A transport failure, or a malformed frame under
    /// [`MalformedFramePolicy::Terminate`].
    Error(SessionError),
}

#[derive(Debug)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub end_reason: EndReason,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    /// Whether playback finished before the render device was stopped.
    pub playback_drained: bool,
}

/// Running devices and the pipeline ends they feed.
pub struct SessionAudio {
    pub capture: Box<dyn AudioDevice>,
    pub capture_handle: CaptureHandle,
    pub ingress: IngressConsumer,
    pub playback: Box<dyn AudioDevice>,
    pub egress: EgressSink,
}

/// Audio state while the read loop runs.
struct ActiveAudio {
    capture: Box<dyn AudioDevice>,
    capture_handle: CaptureHandle,
    ingress_task: JoinHandle<IngressReport>,
    playback: Box<dyn AudioDevice>,
    egress: EgressSink,
}

struct Events(Option<mpsc::UnboundedSender<SessionEvent>>);

impl Events {
    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.0 {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// One voice session over an open connection.
pub struct Session {
    connection: Connection,
    config: SessionConfig,
    audio: Option<SessionAudio>,
    tool_handler: Option<Arc<dyn ToolHandler>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Session {
    pub fn new(connection: Connection, config: SessionConfig) -> Self {
        Self {
            connection,
            config,
            audio: None,
            tool_handler: None,
            events: None,
        }
    }

    pub fn with_audio(mut self, audio: SessionAudio) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handler = Some(handler);
        self
    }

    /// Returns the receiving end of the event stream.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// A handle that can close the session from elsewhere, e.g. on Ctrl-C.
    pub fn handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    /// Runs the read loop until the session ends, then shuts everything down
    /// in order: capture and ingress first, then tool calls (bounded by
    /// [`SessionConfig::tool_grace`]) and the connection, then playback.
    #[instrument(name = "session", skip_all, fields(session_id))]
    pub async fn run(self) -> SessionSummary {
        let Session {
            mut connection,
            config,
            audio,
            tool_handler,
            events,
        } = self;
        let events = Events(events);

        let mut tools = ToolCallCoordinator::new(
            Arc::new(connection.handle()),
            tool_handler,
            config.tool_fallback_output.clone(),
        );
        let mut audio = audio.map(|audio| {
            let ingress_task = tokio::spawn(audio.ingress.run(connection.handle()));
            ActiveAudio {
                capture: audio.capture,
                capture_handle: audio.capture_handle,
                ingress_task,
                playback: audio.playback,
                egress: audio.egress,
            }
        });

        let mut session_id: Option<String> = None;
        let end_reason = loop {
            let message = match connection.receive().await {
                Ok(message) => message,
                Err(SessionError::Protocol(e)) => match config.malformed_policy {
                    MalformedFramePolicy::Skip => {
                        warn!(error = %e, "Skipping undecodable frame.");
                        events.emit(SessionEvent::FrameSkipped {
                            error: e.to_string(),
                        });
                        continue;
                    }
                    MalformedFramePolicy::Terminate => {
                        error!(error = %e, "Undecodable frame; ending session.");
                        break EndReason::Error(SessionError::Protocol(e));
                    }
                },
                Err(SessionError::StreamClosed | SessionError::ConnectionClosed) => {
                    info!("Session channel closed.");
                    break EndReason::StreamClosed;
                }
                Err(e) => {
                    error!(error = %e, "Session channel failed.");
                    break EndReason::Error(e);
                }
            };

            if message.direction() == Direction::Outbound {
                warn!(tag = message.tag(), "Ignoring client-only message from the agent.");
                continue;
            }

            match message {
                Message::SessionStarted(started) => {
                    if let Some(current) = &session_id {
                        warn!(%current, ignored = %started.session_id, "Session already started.");
                        continue;
                    }
                    tracing::Span::current().record("session_id", started.session_id.as_str());
                    info!("Session started.");
                    events.emit(SessionEvent::Started {
                        session_id: started.session_id.clone(),
                    });
                    session_id = Some(started.session_id);
                }
                Message::SessionEnded(ended) => {
                    info!(reason = ?ended.reason, "Agent ended the session.");
                    events.emit(SessionEvent::Ended {
                        reason: ended.reason.clone(),
                    });
                    break EndReason::SessionEnded {
                        reason: ended.reason,
                    };
                }
                Message::ResponseAudio(response) => match &audio {
                    Some(audio) => {
                        if let Err(e) = audio.egress.push_base64(&response.audio) {
                            warn!(turn_id = %response.turn_id, error = %e, "Dropping agent audio.");
                        }
                    }
                    None => debug!("No playback configured; ignoring agent audio."),
                },
                Message::ResponseText(response) => {
                    debug!(turn_id = %response.turn_id, "Agent text.");
                    events.emit(SessionEvent::ResponseText {
                        turn_id: response.turn_id,
                        text: response.text,
                    });
                }
                Message::InputAudioTranscript(transcript) => {
                    events.emit(SessionEvent::Transcript {
                        transcript: transcript.transcript,
                    });
                }
                Message::ToolCall(call) => {
                    info!(tool_call_id = %call.tool_call_id, tool = %call.tool_name, "Tool call.");
                    events.emit(SessionEvent::ToolCall {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                    });
                    tools.dispatch(call);
                }
                Message::Interruption => {
                    if config.flush_on_interruption {
                        if let Some(audio) = &audio {
                            if let Err(e) = audio.egress.flush() {
                                warn!(error = %e, "Failed to flush playback.");
                            }
                        }
                    }
                    events.emit(SessionEvent::Interruption);
                }
                Message::SpeechStarted(speech) => {
                    events.emit(SessionEvent::SpeechStarted {
                        emulated: speech.emulated,
                    });
                }
                Message::SpeechStopped => events.emit(SessionEvent::SpeechStopped),
                // Filtered out by direction above.
                Message::InputAudio(_) | Message::ToolCallOutput(_) => {}
            }
        };

        // --- 1. Stop capture and flush what was already captured ---
        let mut ingress = IngressReport::default();
        if let Some(audio) = audio.as_mut() {
            if let Err(e) = audio.capture.stop() {
                warn!(device = audio.capture.name(), error = %e, "Capture did not stop cleanly.");
            }
            audio.capture_handle.finish();
            match (&mut audio.ingress_task).await {
                Ok(report) => ingress = report,
                Err(e) => error!(error = %e, "Ingress task failed."),
            }
        }

        // --- 2. Answer outstanding tool calls, then close the connection ---
        if tokio::time::timeout(config.tool_grace, tools.join_all())
            .await
            .is_err()
        {
            warn!(grace = ?config.tool_grace, "Tool calls still running after the grace period.");
        }
        tools.abort_all().await;
        connection.close().await;

        // --- 3. Let playback drain, then stop it ---
        let mut playback_drained = false;
        if let Some(ActiveAudio {
            mut playback,
            egress,
            ..
        }) = audio
        {
            playback_drained = egress.finish().wait(config.drain_grace).await;
            if !playback_drained {
                debug!(grace = ?config.drain_grace, "Playback did not drain in time.");
            }
            if let Err(e) = playback.stop() {
                warn!(device = playback.name(), error = %e, "Playback did not stop cleanly.");
            }
        }

        info!(
            frames_sent = ingress.sent,
            frames_dropped = ingress.dropped,
            playback_drained,
            "Session finished."
        );
        SessionSummary {
            session_id,
            end_reason,
            frames_sent: ingress.sent,
            frames_dropped: ingress.dropped,
            playback_drained,
        }
    }
}
