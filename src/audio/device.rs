//! cpal-backed capture devices
//!
//! cpal delivers audio through callbacks and its streams may not leave the
//! thread that built them, so each opened stream lives on a keeper thread and
//! forwards converted 16-bit bytes over a bounded channel that `read` drains.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::{CaptureBackend, CaptureStream, MinBufferError, ReadError};
use crate::audio::frame::{CaptureConfig, CaptureSpec, SourceKind};
use crate::constants::CPAL_QUEUE_DEPTH;
use crate::session::permission::PermissionProbe;

/// Input device summary for listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available input devices
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = device_capabilities(&device);
            Some(InputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

fn device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut chans = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            for rate_val in [16_000u32, 44_100, 48_000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !rates.contains(&rate_val)
                {
                    rates.push(rate_val);
                }
            }
            if !chans.contains(&config.channels()) {
                chans.push(config.channels());
            }
        }
    }

    rates.sort_unstable();
    chans.sort_unstable();
    (rates, chans)
}

/// Resolve a source kind to a concrete input device.
///
/// `Microphone` picks the first input whose name mentions a microphone and
/// falls back to the default input.
pub fn find_input_device(source: SourceKind) -> Option<cpal::Device> {
    let host = cpal::default_host();

    if source == SourceKind::Microphone {
        if let Ok(devices) = host.input_devices() {
            for device in devices {
                let is_mic = device
                    .name()
                    .map(|n| n.to_lowercase().contains("mic"))
                    .unwrap_or(false);
                if is_mic {
                    return Some(device);
                }
            }
        }
    }

    host.default_input_device()
}

/// The device range able to deliver `spec`, preferring native 16-bit.
fn matching_range(
    device: &cpal::Device,
    spec: &CaptureSpec,
) -> Result<cpal::SupportedStreamConfigRange, MinBufferError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| MinBufferError::Unavailable(e.to_string()))?;

    let rate = cpal::SampleRate(spec.sample_rate);
    let mut candidates: Vec<_> = configs
        .filter(|c| c.channels() == spec.layout.channels())
        .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
        .filter(|c| {
            matches!(
                c.sample_format(),
                cpal::SampleFormat::I16 | cpal::SampleFormat::F32
            )
        })
        .collect();

    candidates.sort_by_key(|c| c.sample_format() != cpal::SampleFormat::I16);
    candidates
        .into_iter()
        .next()
        .ok_or(MinBufferError::InvalidParameters)
}

/// Capture backend over the host's default cpal host
pub struct CpalBackend {
    read_timeout: Duration,
}

impl CpalBackend {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl CaptureBackend for CpalBackend {
    fn min_buffer_size(&self, spec: &CaptureSpec) -> Result<usize, MinBufferError> {
        let device = find_input_device(spec.source)
            .ok_or_else(|| MinBufferError::Unavailable("no input device".to_string()))?;
        let range = matching_range(&device, spec)?;

        let frames = match range.buffer_size() {
            SupportedBufferSize::Range { min, .. } if *min > 0 => *min as usize,
            // 20 ms when the host will not say
            _ => (spec.sample_rate / 50) as usize,
        };
        Ok(frames * spec.bytes_per_frame())
    }

    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>, String> {
        let device = find_input_device(config.spec.source)
            .ok_or_else(|| "no input device".to_string())?;
        let range = matching_range(&device, &config.spec).map_err(|e| e.to_string())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let stream_config = cpal::StreamConfig {
            channels: config.spec.layout.channels(),
            sample_rate: cpal::SampleRate(config.spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = range.sample_format();

        let (data_tx, data_rx) = bounded::<Vec<u8>>(CPAL_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));

        let running_for_keeper = running.clone();
        let failed_for_stream = failed.clone();

        let keeper = thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let built = match sample_format {
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &stream_config, data_tx, failed_for_stream)
                    }
                    _ => build_stream::<f32>(&device, &stream_config, data_tx, failed_for_stream),
                };

                let stream = match built {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_keeper.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| e.to_string())?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!("cpal input stream on '{}' ({:?})", device_name, sample_format);
                Ok(Box::new(CpalStream {
                    data_rx,
                    pending: Vec::new(),
                    running,
                    failed,
                    keeper: Some(keeper),
                    read_timeout: self.read_timeout,
                }))
            }
            Ok(Err(e)) => {
                let _ = keeper.join();
                Err(e)
            }
            Err(_) => {
                let _ = keeper.join();
                Err("cpal keeper thread exited during setup".to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    data_tx: Sender<Vec<u8>>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, String>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for &sample in data {
                    bytes.extend_from_slice(&sample.to_sample::<i16>().to_le_bytes());
                }
                // Reader fell behind: drop rather than block the audio thread
                let _ = data_tx.try_send(bytes);
            },
            move |err| {
                tracing::error!("cpal input stream error: {}", err);
                failed.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| e.to_string())
}

struct CpalStream {
    data_rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    keeper: Option<JoinHandle<()>>,
    read_timeout: Duration,
}

impl CaptureStream for CpalStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(ReadError::DeadObject);
        }
        if buf.is_empty() {
            return Err(ReadError::BadValue);
        }

        if self.pending.is_empty() {
            match self.data_rx.recv_timeout(self.read_timeout) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(ReadError::DeadObject),
            }
        }

        // Top up from whatever else is already queued
        while self.pending.len() < buf.len() {
            match self.data_rx.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(_) => break,
            }
        }

        // Keep reads sample-aligned
        let n = self.pending.len().min(buf.len()) & !1;
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
        self.pending.clear();
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Treats the presence of any input device as permission to record.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputDevicePermission;

impl PermissionProbe for InputDevicePermission {
    fn is_granted(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }
}
