//! Synthetic sine-tone capture backend
//!
//! Lets the microphone run on machines with no input hardware. Reads are
//! paced to real time so the receiver sees a normal packet rate.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use crate::audio::backend::{CaptureBackend, CaptureStream, MinBufferError, ReadError};
use crate::audio::frame::{CaptureConfig, CaptureSpec};

pub struct ToneBackend {
    frequency: f64,
    amplitude: f64,
}

impl ToneBackend {
    /// `amplitude` is a fraction of full scale and is clamped to [0, 1].
    pub fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl CaptureBackend for ToneBackend {
    fn min_buffer_size(&self, spec: &CaptureSpec) -> Result<usize, MinBufferError> {
        if spec.sample_rate == 0 {
            return Err(MinBufferError::InvalidParameters);
        }
        Ok((spec.sample_rate / 50) as usize * spec.bytes_per_frame())
    }

    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>, String> {
        Ok(Box::new(ToneStream {
            phase: 0.0,
            step: 2.0 * PI * self.frequency / config.spec.sample_rate as f64,
            amplitude: self.amplitude * i16::MAX as f64,
            sample_rate: config.spec.sample_rate,
            channels: config.spec.layout.channels() as usize,
            next_deadline: Instant::now(),
        }))
    }

    fn name(&self) -> &str {
        "tone"
    }
}

struct ToneStream {
    phase: f64,
    step: f64,
    amplitude: f64,
    sample_rate: u32,
    channels: usize,
    next_deadline: Instant,
}

impl CaptureStream for ToneStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        let frame_bytes = 2 * self.channels;
        let frames = buf.len() / frame_bytes;
        if frames == 0 {
            return Err(ReadError::BadValue);
        }

        for frame in buf[..frames * frame_bytes].chunks_exact_mut(frame_bytes) {
            let value = (self.phase.sin() * self.amplitude) as i16;
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&value.to_le_bytes());
            }
            self.phase = (self.phase + self.step) % (2.0 * PI);
        }

        self.next_deadline +=
            Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
        } else {
            // Fell behind; don't burst to catch up
            self.next_deadline = now;
        }

        Ok(frames * frame_bytes)
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{FallbackCandidate, PcmFrame, SourceKind};

    #[test]
    fn produces_full_scale_bounded_sine() {
        let backend = ToneBackend::new(1_000.0, 0.5);
        let spec = FallbackCandidate::new(SourceKind::Default, 16_000, 2).spec();
        let config = CaptureConfig::from_minimum(spec, backend.min_buffer_size(&spec).unwrap(), 2);
        let mut stream = backend.open(&config).unwrap();

        let mut buf = vec![0u8; 320];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 320);

        let frame = PcmFrame::copy_from(&buf, n);
        let peak = frame.samples().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 15_000 && peak <= 16_384);
        stream.release();
    }
}
