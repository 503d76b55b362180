//! Spectrum analysis for the visualization feed

pub mod fft;
pub mod spectrum;

pub use spectrum::{SpectrumAnalyzer, SpectrumFrame};
