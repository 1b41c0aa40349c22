//! Host audio devices through cpal.
//!
//! cpal streams cannot move between threads on every platform, so each
//! stream is built and owned by a dedicated thread. The returned
//! [`CpalStream`] only holds the means to stop that thread.

use crate::{
    device::{AudioDevice, DeviceDirection, DeviceInfo},
    egress::Renderer,
    error::DeviceError,
    frame::{FrameAssembler, SAMPLE_RATE},
    ingress::CaptureHandle,
    pcm,
};
use cpal::{
    SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig,
    SupportedStreamConfigRange,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// A cpal stream running on its own thread.
pub struct CpalStream {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<Result<(), DeviceError>>>,
}

impl AudioDevice for CpalStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Ok(());
        };
        let _ = stop_tx.send(());
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(DeviceError::Pause("audio thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(device = %self.name, error = %e, "Audio stream did not stop cleanly.");
        }
    }
}

/// Opens the default input device and feeds fixed-size frames of
/// `frame_samples` into `capture`.
pub fn start_capture(
    frame_samples: usize,
    capture: CaptureHandle,
) -> Result<CpalStream, DeviceError> {
    spawn_stream(DeviceDirection::Input, move |device, supported| {
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels.max(1));
        let assembler = FrameAssembler::new(frame_samples);
        match supported.sample_format() {
            SampleFormat::I16 => {
                build_capture::<i16>(device, &config, channels, assembler, capture, |s| s)
            }
            _ => build_capture::<f32>(
                device,
                &config,
                channels,
                assembler,
                capture,
                pcm::f32_to_i16,
            ),
        }
    })
}

/// Opens the default output device and renders from `renderer`.
pub fn start_playback(renderer: Renderer) -> Result<CpalStream, DeviceError> {
    spawn_stream(DeviceDirection::Output, move |device, supported| {
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels.max(1));
        match supported.sample_format() {
            SampleFormat::I16 => build_playback::<i16>(device, &config, channels, renderer, |s| s),
            _ => build_playback::<f32>(device, &config, channels, renderer, pcm::i16_to_f32),
        }
    })
}

/// Lists the host's input and output devices.
pub fn list_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut listed = Vec::new();
    let inputs = host
        .input_devices()
        .map_err(|e| DeviceError::Query(e.to_string()))?;
    for device in inputs {
        let name = device_name(&device);
        let supports_session_rate = device
            .supported_input_configs()
            .map(|ranges| pick_config(ranges, &name).is_ok())
            .unwrap_or(false);
        listed.push(DeviceInfo {
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
            direction: DeviceDirection::Input,
            supports_session_rate,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|e| DeviceError::Query(e.to_string()))?;
    for device in outputs {
        let name = device_name(&device);
        let supports_session_rate = device
            .supported_output_configs()
            .map(|ranges| pick_config(ranges, &name).is_ok())
            .unwrap_or(false);
        listed.push(DeviceInfo {
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
            direction: DeviceDirection::Output,
            supports_session_rate,
        });
    }
    Ok(listed)
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".into())
}

/// Picks a configuration running at the session rate with a sample format
/// the pipelines can convert, preferring fewer channels and native i16.
fn pick_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    device: &str,
) -> Result<SupportedStreamConfig, DeviceError> {
    let rate = SampleRate(SAMPLE_RATE);
    ranges
        .filter(|range| matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .min_by_key(|range| (range.channels(), range.sample_format() != SampleFormat::I16))
        .map(|range| range.with_sample_rate(rate))
        .ok_or_else(|| DeviceError::UnsupportedConfig {
            device: device.to_string(),
            sample_rate: SAMPLE_RATE,
        })
}

/// Builds and plays a stream on a dedicated thread, waiting until it is
/// running (or failed) before returning.
fn spawn_stream<F>(direction: DeviceDirection, build: F) -> Result<CpalStream, DeviceError>
where
    F: FnOnce(&cpal::Device, SupportedStreamConfig) -> Result<cpal::Stream, DeviceError>
        + Send
        + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String, DeviceError>>(1);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(format!("vatel-{direction}"))
        .spawn(move || {
            let stream = match open_stream(direction, build) {
                Ok((name, stream)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return Ok(());
                }
            };
            // Either an explicit stop or the handle being dropped.
            let _ = stop_rx.recv();
            stream
                .pause()
                .map_err(|e| DeviceError::Pause(e.to_string()))
        })
        .map_err(|e| DeviceError::Build(e.to_string()))?;

    let name = match ready_rx.recv() {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            let _ = thread.join();
            return Err(DeviceError::Build("audio thread exited early".into()));
        }
    };
    info!(device = %name, %direction, sample_rate = SAMPLE_RATE, "Audio stream started.");
    Ok(CpalStream {
        name,
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

fn open_stream<F>(
    direction: DeviceDirection,
    build: F,
) -> Result<(String, cpal::Stream), DeviceError>
where
    F: FnOnce(&cpal::Device, SupportedStreamConfig) -> Result<cpal::Stream, DeviceError>,
{
    let host = cpal::default_host();
    let (device, ranges) = match direction {
        DeviceDirection::Input => {
            let device = host
                .default_input_device()
                .ok_or(DeviceError::NoDevice("input"))?;
            let ranges: Vec<_> = device
                .supported_input_configs()
                .map_err(|e| DeviceError::Query(e.to_string()))?
                .collect();
            (device, ranges)
        }
        DeviceDirection::Output => {
            let device = host
                .default_output_device()
                .ok_or(DeviceError::NoDevice("output"))?;
            let ranges: Vec<_> = device
                .supported_output_configs()
                .map_err(|e| DeviceError::Query(e.to_string()))?
                .collect();
            (device, ranges)
        }
    };
    let name = device_name(&device);
    let supported = pick_config(ranges.into_iter(), &name)?;
    debug!(device = %name, config = ?supported, "Selected audio configuration.");

    let stream = build(&device, supported)?;
    stream
        .play()
        .map_err(|e| DeviceError::Play(e.to_string()))?;
    Ok((name, stream))
}

fn build_capture<T: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut assembler: FrameAssembler,
    capture: CaptureHandle,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream, DeviceError> {
    let mut mono = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                // First channel only.
                mono.extend(data.iter().step_by(channels).map(|&s| to_i16(s)));
                assembler.push(&mono, |frame| {
                    capture.push(frame);
                });
            },
            |err| error!(error = %err, "Audio input error."),
            None,
        )
        .map_err(|e| DeviceError::Build(e.to_string()))
}

fn build_playback<T: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut renderer: Renderer,
    from_i16: fn(i16) -> T,
) -> Result<cpal::Stream, DeviceError> {
    let fault = Arc::new(AtomicBool::new(false));
    let fault_flag = fault.clone();
    let mut mono = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0i16);
                if fault.swap(false, Ordering::Relaxed) {
                    renderer.render_fault(&mut mono);
                } else {
                    renderer.render(&mut mono);
                }
                for (out, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    out.fill(from_i16(sample));
                }
            },
            move |err| {
                error!(error = %err, "Audio output error.");
                fault_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| DeviceError::Build(e.to_string()))
}
