//! # Wireless Mic
//!
//! Turns a capture device into a wireless microphone for a receiver on the
//! same LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               MIC HOST                                │
//! │                                                                       │
//! │  ┌──────────────────┐        PcmFrame        ┌──────────────────┐     │
//! │  │  CaptureEngine   │ ─────────┬───────────► │ SpectrumAnalyzer │     │
//! │  │ (audio::capture) │          │             │    (analysis)    │     │
//! │  │  fallback chain  │          │             └────────┬─────────┘     │
//! │  └────────▲─────────┘          │                      │ SpectrumFrame │
//! │           │                    ▼                      ▼               │
//! │           │          ┌──────────────────┐    ┌──────────────────┐     │
//! │           │          │   StreamSender   │    │  watch channels  │     │
//! │           │          │ (network::sender)│    │ state + spectrum │     │
//! │           │          └────────┬─────────┘    └────────▲─────────┘     │
//! │           │                   │ raw PCM               │               │
//! │  ┌────────┴───────────────────┼───────────────────────┴─────────┐     │
//! │  │          SessionController (session::controller)            │     │
//! │  └────────────────────────────┼─────────────────▲───────────────┘     │
//! │                               │                 │ PairingEvent        │
//! │                               │      ┌──────────┴───────────┐         │
//! │                               │      │    PairingService    │         │
//! │                               │      │  mDNS + UDP listener │         │
//! │                               │      └──────────▲───────────┘         │
//! └───────────────────────────────┼─────────────────┼─────────────────────┘
//!                                 │ UDP             │ "CONNECT:<port>"
//!                                 ▼                 │
//!                         ┌───────────────────────────────┐
//!                         │            RECEIVER           │
//!                         └───────────────────────────────┘
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// mDNS service type the receiver browses for
    pub const SERVICE_TYPE: &str = "_androidmic._udp.local.";

    /// Port advertised and listened on for the handshake
    pub const DEFAULT_HANDSHAKE_PORT: u16 = 12346;

    /// Points in the waveform and frequency series
    pub const DEFAULT_BANDS: usize = 100;

    pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

    /// FFT size cap (power of two)
    pub const DEFAULT_MAX_FFT_SIZE: usize = 1024;

    /// Frames buffered between capture and the send worker
    pub const SEND_QUEUE_CAPACITY: usize = 64;

    /// SO_SNDBUF for the audio socket
    pub const SEND_BUFFER_SIZE: usize = 256 * 1024;

    /// Handshake receive buffer; a datagram that fills it is dropped
    pub const HANDSHAKE_BUFFER_SIZE: usize = 64 * 1024;

    /// Hardware callbacks queued ahead of the capture loop
    pub const CPAL_QUEUE_DEPTH: usize = 32;

    /// Frames between capture statistics log lines
    pub const STATS_LOG_INTERVAL: u64 = 100;

    /// Elapsed-time resolution while recording
    pub const TICK_INTERVAL_MS: u64 = 100;

    /// Capacity of the one-shot UI event queue
    pub const UI_EVENT_CAPACITY: usize = 16;
}
