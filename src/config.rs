//! Application configuration
//!
//! Read from TOML. Every section and field is optional; missing values take
//! the defaults below.
//!
//! ```toml
//! [pairing]
//! port = 12346
//! device_name = "Desk Mic"
//!
//! [[capture.fallbacks]]
//! source = "microphone"
//! sample_rate = 48000
//! buffer_multiplier = 4
//!
//! [analysis]
//! bands = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::frame::FallbackCandidate;
use crate::constants::{
    DEFAULT_BANDS, DEFAULT_HANDSHAKE_PORT, DEFAULT_MAX_FFT_SIZE, DEFAULT_SMOOTHING_WINDOW,
    SEND_QUEUE_CAPACITY, SERVICE_TYPE,
};
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pairing: PairingConfig,
    pub capture: CaptureSettings,
    pub analysis: AnalysisConfig,
    pub sender: SenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Advertised port; the handshake listener binds the same port
    pub port: u16,
    /// Instance name shown to receivers
    pub device_name: String,
    pub service_type: String,
    /// Upper bound on how long a cancelled listener may stay blocked
    pub listener_timeout_ms: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HANDSHAKE_PORT,
            device_name: default_device_name(),
            service_type: SERVICE_TYPE.to_string(),
            listener_timeout_ms: 250,
        }
    }
}

impl PairingConfig {
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms.max(1))
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "WirelessMic".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Tried in order until one initializes
    pub fallbacks: Vec<FallbackCandidate>,
    /// How long a single hardware read may wait for data
    pub read_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fallbacks: FallbackCandidate::default_chain(),
            read_timeout_ms: 50,
        }
    }
}

impl CaptureSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Points in both the waveform and the frequency profile
    pub bands: usize,
    pub smoothing_window: usize,
    /// Largest FFT; must be a power of two
    pub max_fft_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            max_fft_size: DEFAULT_MAX_FFT_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Frames buffered between capture and the socket
    pub queue_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: SEND_QUEUE_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the per-user config directory, or defaults if there is no
    /// file there.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "lan-audio", "wireless-mic")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.pairing.port == 0 {
            return Err(Error::Config("pairing.port must be a fixed, non-zero port".into()));
        }
        if self.capture.fallbacks.is_empty() {
            return Err(Error::Config("capture.fallbacks must not be empty".into()));
        }
        for candidate in &self.capture.fallbacks {
            if candidate.buffer_multiplier < 2 {
                return Err(Error::Config(format!(
                    "buffer_multiplier for {}Hz must be at least 2",
                    candidate.sample_rate
                )));
            }
            if candidate.sample_rate == 0 {
                return Err(Error::Config("sample_rate must be positive".into()));
            }
        }
        if self.analysis.bands == 0 {
            return Err(Error::Config("analysis.bands must be positive".into()));
        }
        if !self.analysis.max_fft_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "analysis.max_fft_size {} is not a power of two",
                self.analysis.max_fft_size
            )));
        }
        if self.sender.queue_capacity == 0 {
            return Err(Error::Config("sender.queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::SourceKind;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.pairing.port, 12346);
        assert_eq!(config.pairing.service_type, "_androidmic._udp.local.");
        assert_eq!(config.capture.fallbacks, FallbackCandidate::default_chain());
        assert_eq!(config.analysis.bands, 100);
        assert_eq!(config.analysis.smoothing_window, 3);
        assert_eq!(config.analysis.max_fft_size, 1024);
    }

    #[test]
    fn partial_sections_override_only_their_fields() {
        let config = AppConfig::from_toml_str(
            r#"
            [pairing]
            device_name = "Desk Mic"

            [[capture.fallbacks]]
            source = "microphone"
            sample_rate = 48000
            buffer_multiplier = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.pairing.device_name, "Desk Mic");
        assert_eq!(config.pairing.port, 12346);
        assert_eq!(
            config.capture.fallbacks,
            vec![FallbackCandidate::new(SourceKind::Microphone, 48_000, 3)]
        );
    }

    #[test]
    fn rejects_undersized_buffers_and_bad_fft_caps() {
        let err = AppConfig::from_toml_str(
            r#"
            [[capture.fallbacks]]
            source = "default"
            sample_rate = 44100
            buffer_multiplier = 1
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least 2"));

        let err = AppConfig::from_toml_str("[analysis]\nmax_fft_size = 1000\n").unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn rejects_an_ephemeral_pairing_port() {
        let err = AppConfig::from_toml_str("[pairing]\nport = 0\n").unwrap_err();
        assert!(err.to_string().contains("pairing.port"));
    }

    #[test]
    fn written_config_reads_back() {
        let mut config = AppConfig::default();
        config.analysis.bands = 64;
        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }
}
