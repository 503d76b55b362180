//! Session phases, published snapshots and inputs

use serde::Serialize;
use std::fmt;

use crate::error::CaptureError;
use crate::network::pairing::{PairingEvent, PeerEndpoint};
use crate::session::permission::{PermissionAction, PermissionState};

/// Pairing progress, independent of recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "peer", rename_all = "snake_case")]
pub enum LinkPhase {
    #[default]
    Idle,
    /// Advertising and listening for a handshake
    Pairing,
    Paired(PeerEndpoint),
}

impl LinkPhase {
    pub fn peer(&self) -> Option<PeerEndpoint> {
        match self {
            LinkPhase::Paired(peer) => Some(*peer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "link", rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Pairing,
    Paired(PeerEndpoint),
    /// Capturing; streaming too when the link is paired
    Recording(LinkPhase),
}

impl SessionPhase {
    pub fn link(&self) -> LinkPhase {
        match *self {
            SessionPhase::Idle => LinkPhase::Idle,
            SessionPhase::Pairing => LinkPhase::Pairing,
            SessionPhase::Paired(peer) => LinkPhase::Paired(peer),
            SessionPhase::Recording(link) => link,
        }
    }

    /// The phase with recording switched off
    pub fn from_link(link: LinkPhase) -> Self {
        match link {
            LinkPhase::Idle => SessionPhase::Idle,
            LinkPhase::Pairing => SessionPhase::Pairing,
            LinkPhase::Paired(peer) => SessionPhase::Paired(peer),
        }
    }

    /// Same recording status, different link
    pub fn with_link(&self, link: LinkPhase) -> Self {
        if self.is_recording() {
            SessionPhase::Recording(link)
        } else {
            SessionPhase::from_link(link)
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, SessionPhase::Recording(_))
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Pairing => write!(f, "pairing"),
            SessionPhase::Paired(peer) => write!(f, "paired with {}", peer),
            SessionPhase::Recording(LinkPhase::Paired(peer)) => {
                write!(f, "recording, streaming to {}", peer)
            }
            SessionPhase::Recording(LinkPhase::Pairing) => write!(f, "recording, pairing"),
            SessionPhase::Recording(LinkPhase::Idle) => write!(f, "recording"),
        }
    }
}

/// Immutable snapshot of everything a UI shows
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_recording: bool,
    pub is_pairing: bool,
    pub is_paired: bool,
    pub is_streaming: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub peer: Option<String>,
    pub permission: PermissionState,
}

/// Fire-once notifications for the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    RequestPermission,
    ShowMessage(String),
}

/// Discrete user intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    StartPairing,
    TogglePairing,
    StartRecording,
    StopRecording,
    ToggleRecording,
    Permission(PermissionAction),
}

/// Everything the controller reacts to
#[derive(Debug)]
pub enum SessionInput {
    User(UserAction),
    Pairing(PairingEvent),
    /// The paired receiver went away; keep listening for a new one
    PeerLost,
    /// The capture loop of recording `run` died
    CaptureFailed { run: u64, err: CaptureError },
    Tick,
    Shutdown,
}

impl From<UserAction> for SessionInput {
    fn from(action: UserAction) -> Self {
        SessionInput::User(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> PeerEndpoint {
        PeerEndpoint::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 5000)
    }

    #[test]
    fn link_survives_recording_toggles() {
        let paired = SessionPhase::Paired(peer());
        let recording = SessionPhase::Recording(paired.link());
        assert!(recording.is_recording());
        assert_eq!(SessionPhase::from_link(recording.link()), paired);
    }

    #[test]
    fn with_link_keeps_recording_status() {
        let recording = SessionPhase::Recording(LinkPhase::Pairing);
        assert_eq!(
            recording.with_link(LinkPhase::Paired(peer())),
            SessionPhase::Recording(LinkPhase::Paired(peer()))
        );
        assert_eq!(SessionPhase::Idle.with_link(LinkPhase::Pairing), SessionPhase::Pairing);
    }

    #[test]
    fn phase_descriptions() {
        assert_eq!(SessionPhase::Idle.to_string(), "idle");
        assert_eq!(
            SessionPhase::Recording(LinkPhase::Paired(peer())).to_string(),
            "recording, streaming to 192.168.1.20:5000"
        );
    }
}
