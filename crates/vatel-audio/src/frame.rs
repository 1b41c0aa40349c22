use crate::pcm;
use std::time::Duration;

/// Sample rate of every audio payload on the session channel.
pub const SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame: 20 ms at [`SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 480;

/// One fixed-size block of mono PCM16 samples. Ordering is implied by the
/// order in which frames are produced; there is no sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.samples.len() as u64 * 1_000_000_000 / u64::from(SAMPLE_RATE))
    }

    /// The frame as a wire payload.
    pub fn to_base64(&self) -> String {
        pcm::encode_i16(&self.samples)
    }
}

/// Slices device buffers of arbitrary length into fixed-size frames.
///
/// Host audio APIs rarely honour a requested buffer size, so the capture
/// callback feeds whatever it gets through an assembler. A remainder shorter
/// than one frame waits for the next callback.
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Appends `samples` and hands every completed frame to `emit`, in order.
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(AudioFrame)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let wanted = self.frame_samples - self.pending.len();
            let take = wanted.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_samples {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_samples),
                );
                emit(AudioFrame::new(full));
            }
        }
    }

    /// Samples waiting for the current frame to fill up.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
