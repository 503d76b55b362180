//! Session state machine
//!
//! ```text
//!            StartPairing               handshake
//!   Idle ───────────────► Pairing ─────────────────► Paired(peer)
//!    ▲                      ▲  ▲ ◄──── PeerLost ──────── │   ▲
//!    │     TogglePairing    │  │                         └───┘ handshake
//!    └──────────────────────┴──┴─────────────────────────┘     (replace)
//!
//!   any link phase ──StartRecording──► Recording(link)
//!   Recording(link) ──StopRecording / capture failure──► link
//! ```
//!
//! Recording is layered over the link phase. While recording, the sender
//! streams only when the link is `Paired`. The controller is driven from a
//! single thread; background workers (capture, handshake listener, ticker)
//! report back by queueing `SessionInput`s.

use crossbeam_channel::{bounded, select, tick, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::analysis::{SpectrumAnalyzer, SpectrumFrame};
use crate::audio::backend::CaptureBackend;
use crate::audio::capture::CaptureEngine;
use crate::audio::frame::{CaptureConfig, PcmFrame};
use crate::config::AppConfig;
use crate::constants::{STATS_LOG_INTERVAL, TICK_INTERVAL_MS};
use crate::error::{CaptureError, DiscoveryError};
use crate::network::discovery::ServiceRegistry;
use crate::network::pairing::{PairingEvent, PairingEventSink, PairingService, PairingState, PeerEndpoint};
use crate::network::sender::StreamSender;
use crate::session::permission::{self, PermissionAction, PermissionProbe, PermissionState};
use crate::session::state::{LinkPhase, SessionInput, SessionPhase, SessionState, UiEvent, UserAction};

/// External collaborators handed to a session at construction
#[derive(Clone)]
pub struct SessionParts {
    pub backend: Arc<dyn CaptureBackend>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub permission: Arc<dyn PermissionProbe>,
}

/// Sends `Tick` every interval until dropped
struct Ticker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(interval: Duration, inputs: Sender<SessionInput>) -> std::io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("session-ticker".to_string())
            .spawn(move || {
                let ticks = tick(interval);
                loop {
                    select! {
                        recv(ticks) -> _ => {
                            if inputs.send(SessionInput::Tick).is_err() {
                                return;
                            }
                        }
                        recv(stopped) -> _ => return,
                    }
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

pub struct SessionController {
    config: AppConfig,
    capture: CaptureEngine,
    pairing: PairingService,
    sender: StreamSender,
    probe: Arc<dyn PermissionProbe>,

    phase: SessionPhase,
    permission: PermissionState,
    error: Option<String>,
    recording_since: Option<Instant>,
    elapsed_ms: u64,
    ticker: Option<Ticker>,
    /// Bumped on every recording start; tags capture failures by run
    capture_run: u64,

    /// Loop-back for background workers
    inputs: Sender<SessionInput>,
    events: Sender<UiEvent>,
    state_tx: watch::Sender<SessionState>,
    spectrum_tx: watch::Sender<Arc<SpectrumFrame>>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        parts: SessionParts,
        inputs: Sender<SessionInput>,
        events: Sender<UiEvent>,
    ) -> Self {
        let pairing_inputs = inputs.clone();
        let sink: PairingEventSink = Arc::new(move |event| {
            let _ = pairing_inputs.send(SessionInput::Pairing(event));
        });

        let pairing = PairingService::new(
            parts.registry,
            config.pairing.service_type.clone(),
            config.pairing.listener_timeout(),
            sink,
        );
        let capture = CaptureEngine::new(parts.backend, config.capture.fallbacks.clone());
        let sender = StreamSender::new(config.sender.queue_capacity);

        let permission = permission::transition(
            PermissionState::Initial,
            PermissionAction::Check,
            parts.permission.is_granted(),
        );

        let (state_tx, _) = watch::channel(SessionState::default());
        let (spectrum_tx, _) = watch::channel(Arc::new(SpectrumFrame::flat(config.analysis.bands)));

        let controller = Self {
            config,
            capture,
            pairing,
            sender,
            probe: parts.permission,
            phase: SessionPhase::Idle,
            permission,
            error: None,
            recording_since: None,
            elapsed_ms: 0,
            ticker: None,
            capture_run: 0,
            inputs,
            events,
            state_tx,
            spectrum_tx,
        };
        controller.publish();
        controller
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_spectrum(&self) -> watch::Receiver<Arc<SpectrumFrame>> {
        self.spectrum_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn sender(&self) -> &StreamSender {
        &self.sender
    }

    pub fn pairing(&self) -> &PairingService {
        &self.pairing
    }

    pub fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::User(action) => self.handle_user(action),
            SessionInput::Pairing(PairingEvent::Connected(peer)) => self.on_peer_connected(peer),
            SessionInput::Pairing(PairingEvent::Failed(err)) => self.on_pairing_failed(err),
            SessionInput::PeerLost => self.on_peer_lost(),
            SessionInput::CaptureFailed { run, err } => self.on_capture_failed(run, err),
            SessionInput::Tick => self.on_tick(),
            SessionInput::Shutdown => self.shutdown(),
        }
        self.publish();
    }

    fn handle_user(&mut self, action: UserAction) {
        tracing::debug!("User action {:?} in phase {}", action, self.phase);
        match action {
            UserAction::StartPairing => self.start_pairing(),
            UserAction::TogglePairing => match self.phase.link() {
                LinkPhase::Idle => self.start_pairing(),
                LinkPhase::Pairing | LinkPhase::Paired(_) => self.stop_pairing(),
            },
            UserAction::StartRecording => self.start_recording(),
            UserAction::StopRecording => self.stop_recording(),
            UserAction::ToggleRecording => {
                if self.phase.is_recording() {
                    self.stop_recording();
                } else {
                    self.start_recording();
                }
            }
            UserAction::Permission(action) => self.apply_permission(action),
        }
    }

    fn start_pairing(&mut self) {
        if self.phase.link() != LinkPhase::Idle {
            tracing::debug!("Pairing already in progress");
            return;
        }

        let port = self.config.pairing.port;
        let name = self.config.pairing.device_name.clone();
        match self.pairing.register_service(port, &name) {
            Ok(()) => {
                tracing::info!("Advertising '{}' on port {}", name, port);
                self.phase = self.phase.with_link(LinkPhase::Pairing);
                self.error = None;
            }
            Err(e) => {
                tracing::error!("Pairing failed to start: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    fn stop_pairing(&mut self) {
        self.pairing.cleanup();
        self.sender.clear_target();
        self.sender.stop();
        self.phase = self.phase.with_link(LinkPhase::Idle);
        self.error = None;
        tracing::info!("Pairing stopped");
    }

    fn on_peer_connected(&mut self, peer: PeerEndpoint) {
        // Only the listener's latest peer counts; anything else is stale
        if self.phase.link() == LinkPhase::Idle || self.pairing.session().peer != Some(peer) {
            tracing::debug!("Ignoring stale handshake from {}", peer);
            return;
        }

        // Invalidate the old target before applying the new one
        self.sender.clear_target();
        self.sender.set_target(peer);
        self.phase = self.phase.with_link(LinkPhase::Paired(peer));
        tracing::info!("Paired with {}", peer);

        if self.phase.is_recording() {
            self.start_streaming();
        }
        self.emit(UiEvent::ShowMessage(format!("Connected to {}", peer)));
    }

    fn on_pairing_failed(&mut self, err: DiscoveryError) {
        if self.pairing.session().state != PairingState::Unpaired {
            tracing::debug!("Ignoring failure of a superseded listener: {}", err);
            return;
        }

        tracing::error!("Pairing failed: {}", err);
        self.pairing.cleanup();
        self.sender.clear_target();
        self.sender.stop();
        self.phase = self.phase.with_link(LinkPhase::Idle);
        self.error = Some(err.to_string());
    }

    fn on_peer_lost(&mut self) {
        if self.phase.link().peer().is_none() {
            return;
        }
        self.pairing.disconnect_peer();
        self.sender.clear_target();
        self.sender.stop();
        self.phase = self.phase.with_link(LinkPhase::Pairing);
    }

    fn apply_permission(&mut self, action: PermissionAction) {
        let next = permission::transition(self.permission, action, self.probe.is_granted());
        if next != self.permission {
            tracing::debug!("Permission {:?} -> {:?}", self.permission, next);
        }
        if next != self.permission {
            self.error = None;
        }
        self.permission = next;
        if next == PermissionState::Requesting && action != PermissionAction::Check {
            self.emit(UiEvent::RequestPermission);
        }
    }

    fn start_recording(&mut self) {
        if self.phase.is_recording() {
            tracing::debug!("Already recording");
            return;
        }

        self.permission = permission::transition(
            self.permission,
            PermissionAction::Check,
            self.probe.is_granted(),
        );
        if !self.permission.is_granted() {
            tracing::warn!("Record permission not granted ({:?})", self.permission);
            self.emit(UiEvent::RequestPermission);
            return;
        }

        self.capture_run += 1;
        let on_error = {
            let inputs = self.inputs.clone();
            let run = self.capture_run;
            move |err: CaptureError| {
                let _ = inputs.send(SessionInput::CaptureFailed { run, err });
            }
        };

        let pipeline = FramePipeline {
            sender: self.sender.clone(),
            spectrum_tx: self.spectrum_tx.clone(),
            analysis: self.config.analysis.clone(),
        };

        let config = match self.capture.start_with(|config| pipeline.into_handler(config), on_error) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                self.error = Some(e.to_string());
                return;
            }
        };
        tracing::info!("Recording with {}", config);
        self.error = None;

        self.phase = SessionPhase::Recording(self.phase.link());
        self.recording_since = Some(Instant::now());
        self.elapsed_ms = 0;

        match Ticker::spawn(Duration::from_millis(TICK_INTERVAL_MS), self.inputs.clone()) {
            Ok(ticker) => self.ticker = Some(ticker),
            Err(e) => tracing::warn!("Elapsed-time ticker unavailable: {}", e),
        }

        if let LinkPhase::Paired(peer) = self.phase.link() {
            self.sender.set_target(peer);
            self.start_streaming();
        }
    }

    fn start_streaming(&mut self) {
        if let Err(e) = self.sender.start() {
            tracing::error!("Streaming failed to start: {}", e);
            self.error = Some(e.to_string());
        }
    }

    /// Stop capture, ticker and streaming, keeping the link.
    fn halt_recording(&mut self) {
        self.capture.stop();
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.sender.stop();
        self.update_elapsed();
        self.recording_since = None;
        self.phase = SessionPhase::from_link(self.phase.link());
        self.spectrum_tx
            .send_replace(Arc::new(SpectrumFrame::flat(self.config.analysis.bands)));
    }

    fn stop_recording(&mut self) {
        if !self.phase.is_recording() {
            tracing::debug!("Not recording");
            return;
        }
        self.halt_recording();
        self.error = None;
        tracing::info!("Recording stopped after {} ms", self.elapsed_ms);
    }

    fn on_capture_failed(&mut self, run: u64, err: CaptureError) {
        if run != self.capture_run || !self.phase.is_recording() {
            tracing::debug!("Ignoring capture error from finished run {}: {}", run, err);
            return;
        }
        tracing::error!("Recording aborted: {}", err);
        self.halt_recording();
        self.error = Some(err.to_string());
    }

    fn on_tick(&mut self) {
        if self.phase.is_recording() {
            self.update_elapsed();
        }
    }

    fn update_elapsed(&mut self) {
        if let Some(since) = self.recording_since {
            let ms = since.elapsed().as_millis() as u64;
            self.elapsed_ms = ms - ms % TICK_INTERVAL_MS;
        }
    }

    /// Stop everything. The controller stays usable afterwards.
    pub fn shutdown(&mut self) {
        if self.phase.is_recording() {
            self.halt_recording();
        }
        self.pairing.cleanup();
        self.sender.clear_target();
        self.sender.stop();
        self.phase = SessionPhase::Idle;
        tracing::info!("Session shut down");
    }

    fn emit(&self, event: UiEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => tracing::warn!("UI event queue full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn publish(&self) {
        let link = self.phase.link();
        let snapshot = SessionState {
            phase: self.phase,
            is_recording: self.phase.is_recording(),
            is_pairing: link == LinkPhase::Pairing,
            is_paired: link.peer().is_some(),
            is_streaming: self.sender.is_active(),
            elapsed_ms: self.elapsed_ms,
            error: self.error.clone(),
            peer: link.peer().map(|p| p.to_string()),
            permission: self.permission,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

/// Per-frame work on the capture thread: forward to the sender, then
/// publish the analysis.
struct FramePipeline {
    sender: StreamSender,
    spectrum_tx: watch::Sender<Arc<SpectrumFrame>>,
    analysis: crate::config::AnalysisConfig,
}

impl FramePipeline {
    fn into_handler(self, config: &CaptureConfig) -> impl FnMut(PcmFrame) + Send + 'static {
        let analyzer = SpectrumAnalyzer::new(self.analysis, config.sample_rate());
        let sender = self.sender;
        let spectrum_tx = self.spectrum_tx;
        let mut frames: u64 = 0;

        move |frame: PcmFrame| {
            sender.send(&frame);
            let spectrum = analyzer.analyze(&frame);

            frames += 1;
            if frames % STATS_LOG_INTERVAL == 0 {
                tracing::debug!(
                    "Frame {}: {} bytes, level {:.3}, dominant band {:?}",
                    frames,
                    frame.len(),
                    spectrum.rms(),
                    spectrum.dominant_band()
                );
            }
            spectrum_tx.send_replace(Arc::new(spectrum));
        }
    }
}
