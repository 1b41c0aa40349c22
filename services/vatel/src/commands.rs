//! The work behind each subcommand.

use crate::{cli::RunArgs, config::Config};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use vatel_api::{Agent, ApiClient};
use vatel_session::{SessionConfig, SessionEvent, SessionSummary};

/// Prints the agents visible to the configured API key.
pub async fn list_agents(config: &Config, json: bool) -> Result<()> {
    let client = ApiClient::new(config.api_config()?).context("Invalid API base URL")?;
    let agents = client.list_agents().await.context("Failed to list agents")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else if agents.is_empty() {
        println!("No agents found.");
    } else {
        for agent in &agents {
            println!("{}", agent_line(agent));
        }
    }
    Ok(())
}

fn agent_line(agent: &Agent) -> String {
    let marker = if agent.is_active() { '*' } else { ' ' };
    format!(
        "{marker} {}\t{}",
        agent.id.as_deref().unwrap_or("-"),
        agent.name.as_deref().unwrap_or("(unnamed)")
    )
}

/// One line per event, or `None` for events the terminal does not show.
pub fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Started { session_id } => Some(format!("Session started: {session_id}")),
        SessionEvent::ResponseText { text, .. } => Some(format!("Agent: {text}")),
        SessionEvent::Transcript { transcript } => Some(format!("You: {transcript}")),
        SessionEvent::ToolCall { tool_name, .. } => Some(format!("Tool call: {tool_name}")),
        SessionEvent::Interruption => Some("(interrupted)".to_string()),
        SessionEvent::Ended { reason: Some(reason) } => Some(format!("Session ended: {reason}")),
        SessionEvent::Ended { reason: None } => Some("Session ended.".to_string()),
        SessionEvent::SpeechStarted { .. }
        | SessionEvent::SpeechStopped
        | SessionEvent::FrameSkipped { .. } => None,
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        if let Some(line) = describe(&event) {
            println!("{line}");
        }
    }
}

pub fn session_config(args: &RunArgs) -> SessionConfig {
    SessionConfig {
        malformed_policy: args.on_malformed.into(),
        drain_grace: Duration::from_millis(args.drain_grace_ms),
        flush_on_interruption: args.flush_on_interruption,
        ..SessionConfig::default()
    }
}

#[cfg(feature = "native-audio")]
pub use native::{list_devices, run_session};

#[cfg(not(feature = "native-audio"))]
pub fn list_devices() -> Result<()> {
    anyhow::bail!("this build has no audio support; rebuild with the `native-audio` feature")
}

#[cfg(not(feature = "native-audio"))]
pub async fn run_session(_config: &Config, _args: RunArgs) -> Result<SessionSummary> {
    anyhow::bail!("this build has no audio support; rebuild with the `native-audio` feature")
}

#[cfg(feature = "native-audio")]
mod native {
    use super::*;
    use vatel_audio::{
        AudioDevice, DEFAULT_INGRESS_CAPACITY, FRAME_SAMPLES, egress_channel, host,
        ingress_queue,
    };
    use vatel_realtime::connect;
    use vatel_session::{Session, SessionAudio};

    /// Prints the host's audio devices.
    pub fn list_devices() -> Result<()> {
        let devices = host::list_devices().context("Failed to query audio devices")?;
        for device in devices {
            println!(
                "{:<6} {} {}{}",
                device.direction.to_string(),
                if device.is_default { '*' } else { ' ' },
                device.name,
                if device.supports_session_rate {
                    ""
                } else {
                    " (no 24 kHz mono/stereo config)"
                }
            );
        }
        Ok(())
    }

    fn open_audio() -> Result<SessionAudio> {
        let (egress, renderer) = egress_channel();
        let playback = host::start_playback(renderer).context("Failed to open speaker")?;
        let (capture_handle, ingress) = ingress_queue(DEFAULT_INGRESS_CAPACITY);
        let capture = host::start_capture(FRAME_SAMPLES, capture_handle.clone())
            .context("Failed to open microphone")?;
        info!(capture = capture.name(), playback = playback.name(), "Audio devices open.");
        Ok(SessionAudio {
            capture: Box::new(capture),
            capture_handle,
            ingress,
            playback: Box::new(playback),
            egress,
        })
    }

    /// Runs one session against the default microphone and speaker until the
    /// agent ends it, the channel drops, or the user presses Ctrl-C.
    pub async fn run_session(config: &Config, args: RunArgs) -> Result<SessionSummary> {
        let agent_id = args
            .agent_id
            .clone()
            .or_else(|| config.agent_id.clone())
            .context("No agent id: pass --agent-id or set VATEL_AGENT_ID")?;

        // --- 1. Issue a session token ---
        let client = ApiClient::new(config.api_config()?).context("Invalid API base URL")?;
        let token = client
            .session_token(&agent_id)
            .await
            .context("Failed to obtain a session token")?;

        // --- 2. Connect ---
        let mut connection = connect(&config.connect_config(), &token.token)
            .await
            .context("Failed to open the session channel")?;

        // --- 3. Open audio devices ---
        let audio = match open_audio() {
            Ok(audio) => audio,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        // --- 4. Run until the session ends ---
        let mut session = Session::new(connection, session_config(&args)).with_audio(audio);
        let printer = tokio::spawn(print_events(session.subscribe()));

        let handle = session.handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C. Closing session...");
                handle.close().await;
            }
        });

        let summary = session.run().await;
        interrupt.abort();
        // The event sender is gone once `run` returns.
        let _ = printer.await;
        Ok(summary)
    }
}
