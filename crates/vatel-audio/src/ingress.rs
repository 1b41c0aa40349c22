//! Audio ingress: captured frames → `input_audio` messages.
//!
//! The capture context pushes frames into a bounded drop-oldest queue via a
//! [`CaptureHandle`]; an [`IngressConsumer`] running on the async runtime
//! drains the queue in capture order and sends each frame through a
//! [`MessageSink`]. End of capture is an explicit sentinel, so frames queued
//! before it are always flushed.

use crate::{
    frame::AudioFrame,
    queue::{HandoffQueue, PushOutcome},
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vatel_realtime::{MessageSink, SessionError};
use vatel_types::Message;

/// Default queue bound: 250 frames, i.e. five seconds of 20 ms frames.
pub const DEFAULT_INGRESS_CAPACITY: usize = 250;

/// Creates the hand-off between a capture device and the network sender.
pub fn ingress_queue(capacity: usize) -> (CaptureHandle, IngressConsumer) {
    let queue = Arc::new(HandoffQueue::new(capacity));
    (
        CaptureHandle {
            queue: queue.clone(),
        },
        IngressConsumer { queue },
    )
}

/// Producer side, used from the capture callback. Never waits on the network.
#[derive(Clone)]
pub struct CaptureHandle {
    queue: Arc<HandoffQueue<AudioFrame>>,
}

impl CaptureHandle {
    /// Queues one captured frame; returns `false` once capture has finished.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            PushOutcome::Queued => true,
            PushOutcome::QueuedDroppingOldest => {
                debug!("Ingress queue full; dropped the oldest frame.");
                true
            }
            PushOutcome::Rejected => false,
        }
    }

    /// Enqueues the end-of-capture sentinel.
    pub fn finish(&self) {
        self.queue.finish();
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Outcome of one ingress drain.
#[derive(Debug, Default)]
pub struct IngressReport {
    /// Frames written to the channel.
    pub sent: u64,
    /// Frames evicted because the channel could not keep up.
    pub dropped: u64,
    /// The send failure that stopped the drain early, if any.
    pub error: Option<SessionError>,
}

/// Consumer side, run as a task on the async runtime.
pub struct IngressConsumer {
    queue: Arc<HandoffQueue<AudioFrame>>,
}

impl IngressConsumer {
    /// Sends queued frames in capture order until the sentinel is reached or
    /// a send fails.
    pub async fn run<S: MessageSink>(self, sink: S) -> IngressReport {
        let mut report = IngressReport::default();
        while let Some(frame) = self.queue.pop().await {
            if let Err(e) = sink.send(Message::input_audio(frame.to_base64())).await {
                warn!(error = %e, sent = report.sent, "Stopping audio ingress.");
                report.error = Some(e);
                break;
            }
            report.sent += 1;
        }
        report.dropped = self.queue.dropped();
        info!(
            sent = report.sent,
            dropped = report.dropped,
            "Audio ingress finished."
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FRAME_SAMPLES, pcm};
    use async_trait::async_trait;
    use std::{sync::Mutex, time::Duration};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Message>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: Message) -> Result<(), SessionError> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
                return Err(SessionError::ConnectionClosed);
            }
            sent.push(message);
            Ok(())
        }
    }

    fn frame(marker: i16) -> AudioFrame {
        AudioFrame::new(vec![marker; FRAME_SAMPLES])
    }

    fn markers(messages: &[Message]) -> Vec<i16> {
        messages
            .iter()
            .map(|m| match m {
                Message::InputAudio(input) => pcm::decode_i16(&input.audio).unwrap()[0],
                other => panic!("unexpected message {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_frames_are_sent_in_capture_order() {
        let (capture, consumer) = ingress_queue(DEFAULT_INGRESS_CAPACITY);
        let sink = Arc::new(RecordingSink::default());
        let task = tokio::spawn(consumer.run(sink.clone()));

        let producer = std::thread::spawn(move || {
            for i in 0..100 {
                capture.push(frame(i));
                if i % 10 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            capture.finish();
            // Nothing is sent after the sentinel.
            assert!(!capture.push(frame(-1)));
        });

        let report = task.await.unwrap();
        producer.join().unwrap();

        assert_eq!(report.sent, 100);
        assert_eq!(report.dropped, 0);
        assert!(report.error.is_none());
        let sent = sink.sent.lock().unwrap();
        assert_eq!(markers(&sent), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pending_frames_flush_before_sentinel() {
        let (capture, consumer) = ingress_queue(16);
        for i in 0..10 {
            capture.push(frame(i));
        }
        capture.finish();

        let sink = Arc::new(RecordingSink::default());
        let report = consumer.run(sink.clone()).await;
        assert_eq!(report.sent, 10);
        assert_eq!(markers(&sink.sent.lock().unwrap()), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_overflow_keeps_newest_frames() {
        let (capture, consumer) = ingress_queue(4);
        for i in 0..10 {
            assert!(capture.push(frame(i)));
        }
        capture.finish();
        assert_eq!(capture.dropped(), 6);

        let sink = Arc::new(RecordingSink::default());
        let report = consumer.run(sink.clone()).await;
        assert_eq!(report.sent, 4);
        assert_eq!(report.dropped, 6);
        assert_eq!(markers(&sink.sent.lock().unwrap()), vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_send_failure_stops_the_drain() {
        let (capture, consumer) = ingress_queue(16);
        for i in 0..5 {
            capture.push(frame(i));
        }
        capture.finish();

        let sink = Arc::new(RecordingSink {
            fail_after: Some(2),
            ..Default::default()
        });
        let report = consumer.run(sink.clone()).await;
        assert_eq!(report.sent, 2);
        assert!(matches!(report.error, Some(SessionError::ConnectionClosed)));
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }
}
