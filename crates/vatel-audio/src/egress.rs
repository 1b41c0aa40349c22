//! Audio egress: `response_audio` payloads → playback device.
//!
//! The network loop decodes payloads and hands samples to the render context
//! over an unbounded FIFO, so received audio is never dropped. The
//! [`Renderer`] lives inside the render callback: it never blocks, pads
//! underruns with silence and keeps any excess for the next period.

use crate::{error::AudioError, pcm};
use std::{collections::VecDeque, time::Duration};
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    watch,
};
use tracing::{debug, trace};

/// Hand-off items from the network loop to the render context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressItem {
    Samples(Vec<i16>),
    /// Discard everything queued ahead of this item that has not been played.
    Flush,
    /// Nothing follows. The renderer reports drain once it has played out
    /// everything queued before it.
    EndOfStream,
}

/// Creates the network-side sink and the render-side consumer.
pub fn egress_channel() -> (EgressSink, Renderer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (drained_tx, drained_rx) = watch::channel(false);
    (
        EgressSink {
            tx,
            drained: drained_rx,
        },
        Renderer {
            rx,
            buffer: VecDeque::new(),
            ended: false,
            drained: drained_tx,
            underruns: 0,
        },
    )
}

/// Network side of the egress pipeline.
pub struct EgressSink {
    tx: mpsc::UnboundedSender<EgressItem>,
    drained: watch::Receiver<bool>,
}

impl EgressSink {
    pub fn push_samples(&self, samples: Vec<i16>) -> Result<(), AudioError> {
        if samples.is_empty() {
            return Ok(());
        }
        self.tx
            .send(EgressItem::Samples(samples))
            .map_err(|_| AudioError::PlaybackClosed)
    }

    /// Decodes one base64 PCM16 payload and queues it for playback. Returns
    /// the number of samples queued.
    pub fn push_base64(&self, audio: &str) -> Result<usize, AudioError> {
        let samples = pcm::decode_i16(audio)?;
        let count = samples.len();
        self.push_samples(samples)?;
        Ok(count)
    }

    /// Drops queued audio that has not reached the device yet.
    pub fn flush(&self) -> Result<(), AudioError> {
        self.tx
            .send(EgressItem::Flush)
            .map_err(|_| AudioError::PlaybackClosed)
    }

    /// Enqueues end-of-stream. Use the returned [`EgressDrain`] to wait until
    /// the renderer has played out everything queued so far.
    pub fn finish(self) -> EgressDrain {
        if self.tx.send(EgressItem::EndOfStream).is_err() {
            debug!("Renderer already gone; nothing to drain.");
        }
        EgressDrain {
            drained: self.drained,
        }
    }
}

/// Completion signal for a finished egress pipeline.
pub struct EgressDrain {
    drained: watch::Receiver<bool>,
}

impl EgressDrain {
    /// Waits up to `grace` for the renderer to drain. Returns `true` if it
    /// did, `false` on timeout or if the renderer was dropped first.
    pub async fn wait(mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.drained.wait_for(|done| *done))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }

    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }
}

/// Render side of the egress pipeline; owned by the playback callback.
pub struct Renderer {
    rx: mpsc::UnboundedReceiver<EgressItem>,
    buffer: VecDeque<i16>,
    ended: bool,
    drained: watch::Sender<bool>,
    underruns: u64,
}

impl Renderer {
    /// Fills `out` with the next samples, zero-filling whatever the buffer
    /// cannot cover. Returns how many real samples were written.
    pub fn render(&mut self, out: &mut [i16]) -> usize {
        self.pull();
        let written = out.len().min(self.buffer.len());
        for (slot, sample) in out.iter_mut().zip(self.buffer.drain(..written)) {
            *slot = sample;
        }
        out[written..].fill(0);

        if self.ended && self.buffer.is_empty() {
            self.mark_drained();
        } else if written < out.len() {
            self.underruns += 1;
            trace!(written, wanted = out.len(), "Playback underrun.");
        }
        written
    }

    /// Renders silence for a period the device reported as faulty. Buffered
    /// audio is kept for the following periods.
    pub fn render_fault(&mut self, out: &mut [i16]) {
        self.pull();
        out.fill(0);
    }

    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    /// Samples received but not rendered yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Periods that ran short while more audio was still expected.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Moves everything the network side has queued into the local buffer.
    fn pull(&mut self) {
        while !self.ended {
            match self.rx.try_recv() {
                Ok(EgressItem::Samples(samples)) => self.buffer.extend(samples),
                Ok(EgressItem::Flush) => self.buffer.clear(),
                // A sink dropped without `finish` ends the stream as well.
                Ok(EgressItem::EndOfStream) | Err(TryRecvError::Disconnected) => {
                    self.ended = true;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
    }

    fn mark_drained(&self) {
        self.drained.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: usize = 480;

    /// Renders until the drain signal and returns everything written.
    fn render_until_drained(renderer: &mut Renderer, period: usize) -> Vec<i16> {
        let mut rendered = Vec::new();
        let mut out = vec![i16::MAX; period];
        for _ in 0..1_000 {
            renderer.render(&mut out);
            rendered.extend_from_slice(&out);
            if renderer.is_drained() {
                return rendered;
            }
        }
        panic!("renderer never drained");
    }

    #[test]
    fn test_render_pads_underrun_and_keeps_excess() {
        let (sink, mut renderer) = egress_channel();
        sink.push_samples(vec![1, 2, 3, 4, 5]).unwrap();

        let mut out = [9; 3];
        assert_eq!(renderer.render(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(renderer.buffered(), 2);

        assert_eq!(renderer.render(&mut out), 2);
        assert_eq!(out, [4, 5, 0]);
        assert_eq!(renderer.underruns(), 1);
        assert!(!renderer.is_drained());
    }

    #[test]
    fn test_rendered_total_is_whole_periods_with_zero_tail() {
        for total in [1_000usize, 960, 1, 481] {
            let (sink, mut renderer) = egress_channel();
            let samples: Vec<i16> = (0..total).map(|i| (i % 1_000) as i16 + 1).collect();
            for chunk in samples.chunks(333) {
                sink.push_samples(chunk.to_vec()).unwrap();
            }
            let _drain = sink.finish();

            let rendered = render_until_drained(&mut renderer, PERIOD);
            let periods = total.div_ceil(PERIOD);
            assert_eq!(rendered.len(), periods * PERIOD, "total {total}");
            assert_eq!(&rendered[..total], &samples[..]);
            assert!(rendered[total..].iter().all(|&s| s == 0));
        }
    }

    #[test]
    fn test_fault_period_is_silent_and_keeps_audio() {
        let (sink, mut renderer) = egress_channel();
        sink.push_samples(vec![7; 4]).unwrap();

        let mut out = [1; 4];
        renderer.render_fault(&mut out);
        assert_eq!(out, [0; 4]);
        assert_eq!(renderer.buffered(), 4);

        renderer.render(&mut out);
        assert_eq!(out, [7; 4]);
    }

    #[test]
    fn test_flush_discards_unplayed_audio_only() {
        let (sink, mut renderer) = egress_channel();
        sink.push_samples(vec![1; 8]).unwrap();
        let mut out = [0; 4];
        renderer.render(&mut out);

        sink.flush().unwrap();
        sink.push_samples(vec![2; 2]).unwrap();
        renderer.render(&mut out);
        assert_eq!(out, [2, 2, 0, 0]);
    }

    #[test]
    fn test_bad_payload_is_reported_and_pipeline_continues() {
        let (sink, mut renderer) = egress_channel();
        assert!(matches!(
            sink.push_base64("not base64!"),
            Err(AudioError::Decode(_))
        ));
        assert_eq!(sink.push_base64(&pcm::encode_i16(&[3, -3])).unwrap(), 2);

        let mut out = [0; 2];
        renderer.render(&mut out);
        assert_eq!(out, [3, -3]);
    }

    #[test]
    fn test_push_after_renderer_dropped() {
        let (sink, renderer) = egress_channel();
        drop(renderer);
        assert!(matches!(
            sink.push_samples(vec![1]),
            Err(AudioError::PlaybackClosed)
        ));
    }

    #[tokio::test]
    async fn test_drain_resolves_once_renderer_plays_out() {
        let (sink, mut renderer) = egress_channel();
        sink.push_samples(vec![5; PERIOD * 3]).unwrap();
        let drain = sink.finish();
        assert!(!drain.is_drained());

        let device = std::thread::spawn(move || {
            let mut out = vec![0; PERIOD];
            while !renderer.is_drained() {
                renderer.render(&mut out);
                std::thread::sleep(Duration::from_millis(2));
            }
        });

        assert!(drain.wait(Duration::from_secs(5)).await);
        device.join().unwrap();
    }

    #[tokio::test]
    async fn test_drain_times_out_without_rendering() {
        let (sink, renderer) = egress_channel();
        sink.push_samples(vec![5; PERIOD]).unwrap();
        let drain = sink.finish();

        assert!(!drain.wait(Duration::from_millis(20)).await);
        drop(renderer);
    }
}
