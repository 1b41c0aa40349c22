use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message as WsMessage};
use vatel_audio::{
    AudioDevice, AudioFrame, DeviceError, FRAME_SAMPLES, Renderer, egress_channel, ingress_queue,
    pcm,
};
use vatel_realtime::{
    ConnectConfig, Connection, ConnectionHandle, ConnectionState, SecretString, SessionError,
    connect,
    types::{Message, ProtocolError},
};
use vatel_session::{
    EndReason, MalformedFramePolicy, Session, SessionAudio, SessionConfig, SessionEvent,
    ToolCallRequest, ToolHandler,
};

async fn spawn_server<F, Fut>(script: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

async fn open(url: String) -> Connection {
    let config = ConnectConfig {
        open_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
        ping_interval: None,
        ..ConnectConfig::new(url)
    };
    connect(&config, &SecretString::from("test-token".to_string()))
        .await
        .unwrap()
}

async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(WsMessage::Text(text.to_string().into())).await.unwrap();
}

/// Reads until the client's close frame and returns the text frames seen.
async fn read_until_close(ws: &mut WebSocketStream<TcpStream>) -> Vec<String> {
    let mut texts = Vec::new();
    while let Some(Ok(frame)) = ws.next().await {
        match frame {
            WsMessage::Text(text) => texts.push(text.to_string()),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    texts
}

fn ended(reason: &str) -> String {
    format!(r#"{{"type":"session_ended","data":{{"reason":"{reason}"}}}}"#)
}

const STARTED_S1: &str = r#"{"type":"session_started","data":{"id":"s1"}}"#;

type Log = Arc<Mutex<Vec<String>>>;

struct FakeCapture {
    log: Log,
}

impl AudioDevice for FakeCapture {
    fn name(&self) -> &str {
        "fake-mic"
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.log.lock().unwrap().push("capture stopped".into());
        Ok(())
    }
}

/// Renders a 480-sample period every 2 ms on its own thread.
struct FakePlayback {
    log: Log,
    connection: ConnectionHandle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<bool>>,
}

impl FakePlayback {
    fn start(mut renderer: Renderer, connection: ConnectionHandle, log: Log) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = running.clone();
            std::thread::spawn(move || {
                let mut out = vec![0i16; FRAME_SAMPLES];
                while running.load(Ordering::Relaxed) {
                    renderer.render(&mut out);
                    std::thread::sleep(Duration::from_millis(2));
                }
                renderer.is_drained()
            })
        };
        Self {
            log,
            connection,
            running,
            thread: Some(thread),
        }
    }
}

impl AudioDevice for FakePlayback {
    fn name(&self) -> &str {
        "fake-speaker"
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let drained = thread.join().unwrap();
            self.log.lock().unwrap().push(format!(
                "playback stopped drained={drained} connection={}",
                self.connection.state()
            ));
        }
        Ok(())
    }
}

struct Answer(&'static str);

#[async_trait]
impl ToolHandler for Answer {
    async fn call(&self, _request: ToolCallRequest) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn test_session_started_binds_id_while_open() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        send_text(&mut ws, r#"{"type":"session_started","data":{"id":"s2"}}"#).await;
        let _ = go_rx.await;
        send_text(&mut ws, &ended("done")).await;
        read_until_close(&mut ws).await;
    })
    .await;

    let mut session = Session::new(open(url).await, SessionConfig::default());
    let handle = session.handle();
    let mut events = session.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut go_tx = Some(go_tx);
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::Started { .. }) {
                assert_eq!(handle.state(), ConnectionState::Open);
                if let Some(go) = go_tx.take() {
                    let _ = go.send(());
                }
            }
            seen.push(event);
        }
        seen
    });

    let summary = session.run().await;
    assert_eq!(summary.session_id.as_deref(), Some("s1"));
    assert!(matches!(
        summary.end_reason,
        EndReason::SessionEnded { reason: Some(ref r) } if r == "done"
    ));

    let seen = watcher.await.unwrap();
    assert_eq!(
        seen,
        vec![
            SessionEvent::Started {
                session_id: "s1".into()
            },
            SessionEvent::Ended {
                reason: Some("done".into())
            },
        ]
    );
}

#[tokio::test]
async fn test_tool_call_output_frame_is_exact() {
    let (frame_tx, frame_rx) = oneshot::channel();
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        send_text(
            &mut ws,
            r#"{"type":"tool_call","data":{"toolCallId":"t1","toolName":"answer","arguments":[]}}"#,
        )
        .await;
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                let _ = frame_tx.send(text.to_string());
                break;
            }
        }
        send_text(&mut ws, &ended("done")).await;
        read_until_close(&mut ws).await;
    })
    .await;

    let summary = Session::new(open(url).await, SessionConfig::default())
        .with_tool_handler(Arc::new(Answer("42")))
        .run()
        .await;

    assert_eq!(
        frame_rx.await.unwrap(),
        r#"{"type":"tool_call_output","data":{"toolCallId":"t1","output":"42"}}"#
    );
    assert!(matches!(summary.end_reason, EndReason::SessionEnded { .. }));
}

#[tokio::test]
async fn test_session_ended_runs_ordered_shutdown() {
    let (inbound_tx, inbound_rx) = oneshot::channel();
    let agent_audio = pcm::encode_i16(&vec![1000i16; 1_000]);
    let url = spawn_server(move |mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        for turn in 0..3 {
            let frame = format!(
                r#"{{"type":"response_audio","data":{{"turn_id":"r{turn}","audio":"{agent_audio}"}}}}"#
            );
            send_text(&mut ws, &frame).await;
        }
        send_text(&mut ws, &ended("bye")).await;
        let _ = inbound_tx.send(read_until_close(&mut ws).await);
    })
    .await;

    let connection = open(url).await;
    let log: Log = Arc::default();
    let (capture_handle, ingress) = ingress_queue(64);
    for i in 0..5 {
        assert!(capture_handle.push(AudioFrame::new(vec![i; FRAME_SAMPLES])));
    }
    let (egress, renderer) = egress_channel();
    let audio = SessionAudio {
        capture: Box::new(FakeCapture { log: log.clone() }),
        capture_handle: capture_handle.clone(),
        ingress,
        playback: Box::new(FakePlayback::start(
            renderer,
            connection.handle(),
            log.clone(),
        )),
        egress,
    };
    let config = SessionConfig {
        drain_grace: Duration::from_secs(2),
        ..SessionConfig::default()
    };

    let summary = Session::new(connection, config).with_audio(audio).run().await;

    assert!(matches!(
        summary.end_reason,
        EndReason::SessionEnded { reason: Some(ref r) } if r == "bye"
    ));
    assert_eq!(summary.frames_sent, 5);
    assert_eq!(summary.frames_dropped, 0);
    assert!(summary.playback_drained);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "capture stopped".to_string(),
            "playback stopped drained=true connection=closed".to_string(),
        ]
    );

    // Every captured frame reached the peer before the close, in order.
    let inbound = inbound_rx.await.unwrap();
    let markers: Vec<i16> = inbound
        .iter()
        .map(|text| match Message::parse(text.as_bytes()).unwrap() {
            Message::InputAudio(input) => pcm::decode_i16(&input.audio).unwrap()[0],
            other => panic!("unexpected frame {other:?}"),
        })
        .collect();
    assert_eq!(markers, vec![0, 1, 2, 3, 4]);
    // Nothing is accepted after the sentinel.
    assert!(!capture_handle.push(AudioFrame::new(vec![9; FRAME_SAMPLES])));
}

#[tokio::test]
async fn test_peer_disconnect_still_shuts_down_audio() {
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        ws.close(None).await.unwrap();
    })
    .await;

    let connection = open(url).await;
    let log: Log = Arc::default();
    let (capture_handle, ingress) = ingress_queue(8);
    let (egress, renderer) = egress_channel();
    let audio = SessionAudio {
        capture: Box::new(FakeCapture { log: log.clone() }),
        capture_handle,
        ingress,
        playback: Box::new(FakePlayback::start(
            renderer,
            connection.handle(),
            log.clone(),
        )),
        egress,
    };

    let summary = Session::new(connection, SessionConfig::default())
        .with_audio(audio)
        .run()
        .await;

    assert!(matches!(summary.end_reason, EndReason::StreamClosed));
    assert_eq!(summary.session_id.as_deref(), Some("s1"));
    let log = log.lock().unwrap();
    assert_eq!(log[0], "capture stopped");
    assert!(log[1].starts_with("playback stopped drained=true"));
}

#[tokio::test]
async fn test_bogus_frame_is_skipped_by_default() {
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, r#"{"type":"bogus"}"#).await;
        send_text(&mut ws, STARTED_S1).await;
        send_text(&mut ws, &ended("done")).await;
        read_until_close(&mut ws).await;
    })
    .await;

    let mut session = Session::new(open(url).await, SessionConfig::default());
    let mut events = session.subscribe();
    let summary = session.run().await;

    assert_eq!(summary.session_id.as_deref(), Some("s1"));
    match events.recv().await {
        Some(SessionEvent::FrameSkipped { error }) => assert!(error.contains("bogus")),
        other => panic!("expected FrameSkipped, got {other:?}"),
    }
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Started {
            session_id: "s1".into()
        })
    );
}

#[tokio::test]
async fn test_bogus_frame_terminates_when_configured() {
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, r#"{"type":"bogus"}"#).await;
        send_text(&mut ws, STARTED_S1).await;
        read_until_close(&mut ws).await;
    })
    .await;

    let config = SessionConfig {
        malformed_policy: MalformedFramePolicy::Terminate,
        ..SessionConfig::default()
    };
    let summary = Session::new(open(url).await, config).run().await;

    match summary.end_reason {
        EndReason::Error(SessionError::Protocol(ProtocolError::UnknownType(tag))) => {
            assert_eq!(tag, "bogus")
        }
        other => panic!("expected UnknownType, got {other:?}"),
    }
    assert!(summary.session_id.is_none());
}

#[tokio::test]
async fn test_speech_and_interruption_events_in_order() {
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        send_text(&mut ws, r#"{"type":"speech_started"}"#).await;
        send_text(&mut ws, r#"{"type":"interruption"}"#).await;
        send_text(&mut ws, r#"{"type":"speech_stopped"}"#).await;
        send_text(&mut ws, &ended("done")).await;
        read_until_close(&mut ws).await;
    })
    .await;

    let mut session = Session::new(
        open(url).await,
        SessionConfig {
            flush_on_interruption: true,
            ..SessionConfig::default()
        },
    );
    let mut events = session.subscribe();
    session.run().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen[1..4],
        [
            SessionEvent::SpeechStarted { emulated: false },
            SessionEvent::Interruption,
            SessionEvent::SpeechStopped,
        ]
    );
}

struct Stalled;

#[async_trait]
impl ToolHandler for Stalled {
    async fn call(&self, _request: ToolCallRequest) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("late".to_string())
    }
}

const TOOL_CALL_T1: &str =
    r#"{"type":"tool_call","data":{"toolCallId":"t1","toolName":"lookup","arguments":[]}}"#;

#[tokio::test]
async fn test_tool_call_just_before_session_ended_is_answered() {
    let (inbound_tx, inbound_rx) = oneshot::channel();
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        send_text(&mut ws, TOOL_CALL_T1).await;
        send_text(&mut ws, r#"{"type":"session_ended"}"#).await;
        let _ = inbound_tx.send(read_until_close(&mut ws).await);
    })
    .await;

    let summary = Session::new(open(url).await, SessionConfig::default())
        .run()
        .await;

    assert!(matches!(
        summary.end_reason,
        EndReason::SessionEnded { reason: None }
    ));
    assert_eq!(
        inbound_rx.await.unwrap(),
        vec![r#"{"type":"tool_call_output","data":{"toolCallId":"t1","output":"ok"}}"#.to_string()]
    );
}

#[tokio::test]
async fn test_stalled_tool_is_abandoned_after_grace() {
    let (inbound_tx, inbound_rx) = oneshot::channel();
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, STARTED_S1).await;
        send_text(&mut ws, TOOL_CALL_T1).await;
        send_text(&mut ws, &ended("done")).await;
        let _ = inbound_tx.send(read_until_close(&mut ws).await);
    })
    .await;

    let config = SessionConfig {
        tool_grace: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    let session = Session::new(open(url).await, config).with_tool_handler(Arc::new(Stalled));
    let summary = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("shutdown must not wait for a stalled tool");

    assert!(matches!(summary.end_reason, EndReason::SessionEnded { .. }));
    assert!(inbound_rx.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_only_frames_from_agent_are_ignored() {
    let (inbound_tx, inbound_rx) = oneshot::channel();
    let url = spawn_server(|mut ws| async move {
        send_text(&mut ws, r#"{"type":"input_audio","data":{"audio":"AAAA"}}"#).await;
        send_text(
            &mut ws,
            r#"{"type":"tool_call_output","data":{"toolCallId":"t9","output":"x"}}"#,
        )
        .await;
        send_text(&mut ws, &ended("done")).await;
        let _ = inbound_tx.send(read_until_close(&mut ws).await);
    })
    .await;

    let mut session = Session::new(open(url).await, SessionConfig::default());
    let mut events = session.subscribe();
    let summary = session.run().await;

    assert!(matches!(summary.end_reason, EndReason::SessionEnded { .. }));
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Ended {
            reason: Some("done".into())
        })
    );
    assert_eq!(events.recv().await, None);
    assert!(inbound_rx.await.unwrap().is_empty());
}
