//! Per-frame waveform and spectrum for visualization
//!
//! Both series have the same fixed length (the configured band count):
//!
//! - waveform: mean absolute amplitude per bucket, lightly smoothed
//! - frequencies: log-spaced bands from min(20 kHz, Nyquist) at index 0 down
//!   to 20 Hz, each log-compressed into [0, 1]
//!
//! Analysis is a pure function of the frame; nothing carries over between
//! frames.

use serde::Serialize;

use crate::analysis::fft::{apply_hamming_window, fft_real, fft_size_for, half_spectrum_magnitudes};
use crate::audio::frame::PcmFrame;
use crate::config::AnalysisConfig;

const MIN_BAND_HZ: f64 = 20.0;
const MAX_BAND_HZ: f64 = 20_000.0;
const FULL_SCALE: f64 = i16::MAX as f64;

/// Visualization data derived from one captured frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumFrame {
    amplitudes: Vec<f32>,
    frequencies: Vec<f32>,
}

impl SpectrumFrame {
    /// A silent baseline of `points` zeros in both series.
    pub fn flat(points: usize) -> Self {
        Self {
            amplitudes: vec![0.0; points],
            frequencies: vec![0.0; points],
        }
    }

    /// Waveform, values in [-1, 1]
    pub fn amplitudes(&self) -> &[f32] {
        &self.amplitudes
    }

    /// Band magnitudes in [0, 1], highest frequency first
    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn rms(&self) -> f32 {
        if self.amplitudes.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.amplitudes.iter().map(|a| a * a).sum();
        (sum / self.amplitudes.len() as f32).sqrt()
    }

    /// Index of the strongest band, if any band is non-zero
    pub fn dominant_band(&self) -> Option<usize> {
        self.frequencies
            .iter()
            .enumerate()
            .filter(|(_, m)| **m > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone)]
pub struct SpectrumAnalyzer {
    config: AnalysisConfig,
    sample_rate: u32,
}

impl SpectrumAnalyzer {
    pub fn new(config: AnalysisConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
        }
    }

    pub fn points(&self) -> usize {
        self.config.bands
    }

    pub fn analyze(&self, frame: &PcmFrame) -> SpectrumFrame {
        let samples: Vec<i16> = frame.samples().collect();
        let points = self.config.bands;

        let amplitudes = smooth(
            &downsample_abs(&samples, points),
            self.config.smoothing_window,
        );
        let frequencies = self.frequency_profile(&samples);

        SpectrumFrame {
            amplitudes,
            frequencies,
        }
    }

    fn frequency_profile(&self, samples: &[i16]) -> Vec<f32> {
        let points = self.config.bands;
        let fft_size = fft_size_for(samples.len(), self.config.max_fft_size);
        if samples.is_empty() || fft_size < 2 {
            return vec![0.0; points];
        }

        let mut window: Vec<f64> = (0..fft_size)
            .map(|i| samples.get(i).map_or(0.0, |&s| s as f64 / FULL_SCALE))
            .collect();
        apply_hamming_window(&mut window);

        let magnitudes = half_spectrum_magnitudes(&fft_real(&window));
        log_bands(&magnitudes, self.sample_rate, points)
    }
}

/// Mean absolute amplitude over `points` equal buckets, normalized to full
/// scale. Shorter inputs repeat samples across buckets.
pub fn downsample_abs(samples: &[i16], points: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; points];
    }

    let len = samples.len();
    (0..points)
        .map(|i| {
            let start = i * len / points;
            let end = ((i + 1) * len / points).clamp(start + 1, len);
            let sum: f64 = samples[start..end]
                .iter()
                .map(|&s| (s as f64).abs() / FULL_SCALE)
                .sum();
            (sum / (end - start) as f64).min(1.0) as f32
        })
        .collect()
}

/// Centered moving average, truncated at the edges. Inputs no longer than
/// the window are returned unchanged.
pub fn smooth(values: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || values.len() <= window {
        return values.to_vec();
    }

    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            let sum: f64 = values[start..end].iter().map(|&v| v as f64).sum();
            (sum / (end - start) as f64) as f32
        })
        .collect()
}

/// Map half-spectrum magnitudes onto `points` log-spaced bands, highest
/// frequency first.
fn log_bands(magnitudes: &[f64], sample_rate: u32, points: usize) -> Vec<f32> {
    if magnitudes.is_empty() || points == 0 {
        return vec![0.0; points];
    }

    let nyquist = sample_rate as f64 / 2.0;
    let hz_per_bin = nyquist / magnitudes.len() as f64;
    let last_bin = magnitudes.len() - 1;

    let log_min = MIN_BAND_HZ.log10();
    let log_max = MAX_BAND_HZ.min(nyquist).log10();
    let compress_scale = 1001f64.log10();

    (0..points)
        .map(|i| {
            let ratio = if points > 1 {
                i as f64 / (points - 1) as f64
            } else {
                0.0
            };
            let centre = 10f64.powf(log_max - ratio * (log_max - log_min));

            let bin_start = ((centre / hz_per_bin) as usize).min(last_bin);
            let bin_end = (((centre + hz_per_bin) / hz_per_bin) as usize).clamp(bin_start, last_bin);

            let band = &magnitudes[bin_start..=bin_end];
            let mean = band.iter().sum::<f64>() / band.len() as f64;

            ((1.0 + 1000.0 * mean).log10() / compress_scale).clamp(0.0, 1.0) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn analyzer(sample_rate: u32) -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(AnalysisConfig::default(), sample_rate)
    }

    fn tone(freq: f64, sample_rate: u32, len: usize, peak: f64) -> PcmFrame {
        let samples: Vec<i16> = (0..len)
            .map(|i| (peak * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin()).round() as i16)
            .collect();
        PcmFrame::from_samples(&samples)
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn silence_gives_flat_zero_output() {
        let frame = PcmFrame::from_samples(&[0i16; 16]);
        let spectrum = analyzer(44_100).analyze(&frame);

        assert_eq!(spectrum.amplitudes().len(), 100);
        assert_eq!(spectrum.frequencies().len(), 100);
        assert!(spectrum.amplitudes().iter().all(|&a| a == 0.0));
        assert!(spectrum.frequencies().iter().all(|&m| m.abs() < 1e-9));
        assert_eq!(spectrum.dominant_band(), None);
    }

    #[test]
    fn repeated_analysis_is_identical() {
        let frame = tone(440.0, 44_100, 882, 8000.0);
        let analyzer = analyzer(44_100);
        let first = analyzer.analyze(&frame);
        let second = analyzer.analyze(&frame);
        assert_eq!(first, second);
    }

    #[test]
    fn outputs_stay_in_range() {
        let samples: Vec<i16> = (0..2048)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let spectrum = analyzer(48_000).analyze(&PcmFrame::from_samples(&samples));

        assert!(spectrum.amplitudes().iter().all(|a| (-1.0..=1.0).contains(a)));
        assert!(spectrum.frequencies().iter().all(|m| (0.0..=1.0).contains(m)));
    }

    #[test]
    fn quiet_tone_peaks_near_its_band() {
        // 1 kHz sits about 43% of the way down a 20 kHz..20 Hz log axis
        let spectrum = analyzer(44_100).analyze(&tone(1_000.0, 44_100, 1024, 10.0));
        let peak = argmax(spectrum.frequencies());

        assert!((38..=48).contains(&peak), "peak at band {}", peak);
        assert!(spectrum.frequencies()[peak] > 0.5);
        assert!(spectrum.frequencies()[80] < 0.3);
    }

    #[test]
    fn bands_run_from_high_to_low() {
        let analyzer = analyzer(44_100);
        let high = argmax(analyzer.analyze(&tone(8_000.0, 44_100, 1024, 10.0)).frequencies());
        let low = argmax(analyzer.analyze(&tone(300.0, 44_100, 1024, 10.0)).frequencies());
        assert!(high < low, "high tone at {}, low tone at {}", high, low);
    }

    #[test]
    fn waveform_tracks_amplitude() {
        let samples: Vec<i16> = (0..200).map(|i| if i < 100 { 0 } else { -16384 }).collect();
        let waveform = downsample_abs(&samples, 4);
        assert_eq!(waveform.len(), 4);
        assert_eq!(waveform[0], 0.0);
        assert!((waveform[3] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn short_frames_still_fill_every_point() {
        let waveform = downsample_abs(&[32767, -32767, 0], 10);
        assert_eq!(waveform.len(), 10);
        assert!(waveform.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn smoothing_averages_neighbours() {
        let smoothed = smooth(&[0.0, 0.0, 3.0, 0.0, 0.0], 3);
        assert_eq!(smoothed, vec![0.0, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(smooth(&[1.0, 2.0], 3), vec![1.0, 2.0]);
    }

    #[test]
    fn larger_frames_are_truncated_to_the_fft_cap() {
        let spectrum = analyzer(48_000).analyze(&tone(1_000.0, 48_000, 4096, 10.0));
        assert_eq!(spectrum.frequencies().len(), 100);
    }

    proptest! {
        #[test]
        fn smoothing_fixes_constant_sequences(
            value in -1.0f32..=1.0,
            len in 0usize..200,
            window in 1usize..9,
        ) {
            let input = vec![value; len];
            prop_assert_eq!(smooth(&input, window), input);
        }
    }
}
