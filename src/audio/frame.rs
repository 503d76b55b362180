//! Capture configurations and PCM frames

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which input the capture hardware should record from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Whatever the host considers its default input
    Default,
    /// An input explicitly identified as a microphone
    Microphone,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Default => f.write_str("default"),
            SourceKind::Microphone => f.write_str("microphone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Sample encoding delivered by the capture path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    Pcm16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm16 => 2,
        }
    }
}

/// Parameters the hardware is asked about before a buffer size is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureSpec {
    pub source: SourceKind,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub format: SampleFormat,
}

impl CaptureSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.layout.channels() as usize * self.format.bytes_per_sample()
    }
}

impl fmt::Display for CaptureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}Hz/{}ch/{:?}",
            self.source,
            self.sample_rate,
            self.layout.channels(),
            self.format
        )
    }
}

/// One entry of the ordered capture fallback list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackCandidate {
    pub source: SourceKind,
    pub sample_rate: u32,
    /// Buffer size as a multiple of the hardware minimum (at least 2)
    pub buffer_multiplier: usize,
}

impl FallbackCandidate {
    pub const fn new(source: SourceKind, sample_rate: u32, buffer_multiplier: usize) -> Self {
        Self {
            source,
            sample_rate,
            buffer_multiplier,
        }
    }

    /// Mono 16-bit is the only wire format the receiver understands.
    pub fn spec(&self) -> CaptureSpec {
        CaptureSpec {
            source: self.source,
            sample_rate: self.sample_rate,
            layout: ChannelLayout::Mono,
            format: SampleFormat::Pcm16,
        }
    }

    /// The default acquisition order: default input, then an explicit
    /// microphone, then a 16 kHz microphone with the smallest legal buffer.
    pub fn default_chain() -> Vec<FallbackCandidate> {
        vec![
            FallbackCandidate::new(SourceKind::Default, 44_100, 4),
            FallbackCandidate::new(SourceKind::Microphone, 44_100, 4),
            FallbackCandidate::new(SourceKind::Microphone, 16_000, 2),
        ]
    }
}

/// A fully resolved capture configuration.
///
/// `buffer_bytes` is always at least twice the hardware-reported minimum for
/// `spec`, and a whole number of sample frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub spec: CaptureSpec,
    pub buffer_bytes: usize,
}

impl CaptureConfig {
    /// Derive a buffer size from the hardware minimum. Multipliers below 2
    /// are raised to 2.
    pub fn from_minimum(spec: CaptureSpec, min_buffer_bytes: usize, multiplier: usize) -> Self {
        let frame = spec.bytes_per_frame().max(1);
        let raw = min_buffer_bytes.max(frame) * multiplier.max(2);
        let buffer_bytes = raw.div_ceil(frame) * frame;
        Self { spec, buffer_bytes }
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }
}

impl fmt::Display for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} buffer={}B", self.spec, self.buffer_bytes)
    }
}

/// One block of captured PCM.
///
/// Holds its own copy of exactly the valid bytes of a read, never a view into
/// the reusable capture buffer. Cloning shares the same immutable bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    data: Bytes,
}

impl PcmFrame {
    /// Copy the first `valid_len` bytes out of a (possibly reused) buffer.
    pub fn copy_from(buffer: &[u8], valid_len: usize) -> Self {
        let len = valid_len.min(buffer.len());
        Self {
            data: Bytes::copy_from_slice(&buffer[..len]),
        }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Valid length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode as little-endian signed 16-bit samples. A trailing odd byte is
    /// ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_at_least_twice_the_minimum() {
        let spec = FallbackCandidate::new(SourceKind::Microphone, 16_000, 1).spec();
        let config = CaptureConfig::from_minimum(spec, 1280, 1);
        assert!(config.buffer_bytes >= 2 * 1280);

        let config = CaptureConfig::from_minimum(spec, 1281, 4);
        assert!(config.buffer_bytes >= 4 * 1281);
        assert_eq!(config.buffer_bytes % spec.bytes_per_frame(), 0);
    }

    #[test]
    fn frame_copies_only_the_valid_length() {
        let mut buffer = vec![0xAAu8; 8];
        buffer[..4].copy_from_slice(&[1, 0, 2, 0]);

        let frame = PcmFrame::copy_from(&buffer, 4);
        buffer.fill(0);

        assert_eq!(frame.as_bytes(), &[1, 0, 2, 0]);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn samples_decode_little_endian() {
        let frame = PcmFrame::from_samples(&[-1, i16::MAX, i16::MIN]);
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![-1, i16::MAX, i16::MIN]);
    }
}
