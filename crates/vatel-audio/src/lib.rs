//! Audio pipelines between host devices and a Vatel session.
//!
//! Capture and render callbacks run on device threads with fixed cadence; the
//! session channel runs on the async runtime. The two only meet through the
//! FIFO hand-offs in [`ingress`] and [`egress`], so neither side ever waits on
//! the other.

pub mod device;
pub mod egress;
pub mod error;
pub mod frame;
#[cfg(feature = "cpal")]
pub mod host;
pub mod ingress;
pub mod pcm;
mod queue;

pub use device::{AudioDevice, DeviceDirection, DeviceInfo};
pub use egress::{EgressDrain, EgressItem, EgressSink, Renderer, egress_channel};
pub use error::{AudioError, DeviceError};
pub use frame::{AudioFrame, FRAME_SAMPLES, FrameAssembler, SAMPLE_RATE};
pub use ingress::{
    CaptureHandle, DEFAULT_INGRESS_CAPACITY, IngressConsumer, IngressReport, ingress_queue,
};
