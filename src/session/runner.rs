//! Session host thread
//!
//! `Session` owns a [`SessionController`] on its own thread and exposes the
//! publish/subscribe surface a UI talks to:
//!
//! - inputs: [`Session::dispatch`]
//! - state and spectrum: `tokio::sync::watch` receivers
//! - one-shot UI events: a bounded crossbeam queue

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;

use crate::analysis::SpectrumFrame;
use crate::config::AppConfig;
use crate::constants::UI_EVENT_CAPACITY;
use crate::error::Result;
use crate::session::controller::{SessionController, SessionParts};
use crate::session::state::{SessionInput, SessionState, UiEvent, UserAction};

pub struct Session {
    inputs: Sender<SessionInput>,
    state: watch::Receiver<SessionState>,
    spectrum: watch::Receiver<Arc<SpectrumFrame>>,
    events: Receiver<UiEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    /// Build the controller and start its thread.
    pub fn spawn(config: AppConfig, parts: SessionParts) -> Result<Self> {
        config.validate()?;

        let (inputs, input_rx) = unbounded::<SessionInput>();
        let (event_tx, events) = bounded(UI_EVENT_CAPACITY);

        let mut controller = SessionController::new(config, parts, inputs.clone(), event_tx);
        let state = controller.subscribe_state();
        let spectrum = controller.subscribe_spectrum();

        let handle = thread::Builder::new()
            .name("session".to_string())
            .spawn(move || {
                tracing::debug!("Session thread started");
                for input in input_rx.iter() {
                    let shutdown = matches!(input, SessionInput::Shutdown);
                    controller.handle(input);
                    if shutdown {
                        break;
                    }
                }
                tracing::debug!("Session thread finished");
            })?;

        Ok(Self {
            inputs,
            state,
            spectrum,
            events,
            handle: Some(handle),
        })
    }

    pub fn dispatch(&self, action: UserAction) {
        if self.inputs.send(SessionInput::User(action)).is_err() {
            tracing::warn!("Session is shut down; dropping {:?}", action);
        }
    }

    /// Report that the paired receiver went away. Pairing falls back to
    /// listening for a new handshake.
    pub fn peer_lost(&self) {
        if self.inputs.send(SessionInput::PeerLost).is_err() {
            tracing::warn!("Session is shut down; dropping peer loss");
        }
    }

    /// Latest published snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_spectrum(&self) -> watch::Receiver<Arc<SpectrumFrame>> {
        self.spectrum.clone()
    }

    pub fn events(&self) -> Receiver<UiEvent> {
        self.events.clone()
    }

    /// Stop recording and pairing, then end the session thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.inputs.send(SessionInput::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Session thread panicked");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::scripted::ScriptedBackend;
    use crate::network::discovery::memory::MemoryRegistry;
    use crate::session::permission::StaticPermission;
    use crate::session::state::SessionPhase;
    use std::time::{Duration, Instant};

    fn parts(registry: &MemoryRegistry, granted: bool) -> SessionParts {
        SessionParts {
            backend: Arc::new(ScriptedBackend::new()),
            registry: Arc::new(registry.clone()),
            permission: Arc::new(StaticPermission(granted)),
        }
    }

    /// A currently unused UDP port
    fn free_port() -> u16 {
        std::net::UdpSocket::bind(("0.0.0.0", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pairing.port = free_port();
        config.pairing.listener_timeout_ms = 50;
        config
    }

    fn wait_for(session: &Session, done: impl Fn(&SessionState) -> bool) -> SessionState {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let state = session.state();
            if done(&state) {
                return state;
            }
            assert!(Instant::now() < deadline, "timed out in {:?}", state);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dispatched_actions_are_published() {
        let registry = MemoryRegistry::new();
        let mut session = Session::spawn(config(), parts(&registry, true)).unwrap();

        session.dispatch(UserAction::StartPairing);
        session.dispatch(UserAction::StartRecording);
        let state = wait_for(&session, |s| s.is_recording && s.is_pairing);
        assert!(!state.is_streaming);

        session.dispatch(UserAction::StopRecording);
        wait_for(&session, |s| !s.is_recording);

        session.shutdown();
        assert_eq!(session.state().phase, SessionPhase::Idle);
        assert!(registry.live().is_empty());
    }

    #[test]
    fn permission_prompts_arrive_on_the_event_queue() {
        let registry = MemoryRegistry::new();
        let session = Session::spawn(config(), parts(&registry, false)).unwrap();
        let events = session.events();

        session.dispatch(UserAction::ToggleRecording);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(3)).unwrap(),
            UiEvent::RequestPermission
        );
        assert!(!session.state().is_recording);
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let mut config = config();
        config.analysis.bands = 0;
        assert!(Session::spawn(config, parts(&MemoryRegistry::new(), true)).is_err());
    }

    #[test]
    fn dispatch_after_shutdown_is_harmless() {
        let mut session = Session::spawn(config(), parts(&MemoryRegistry::new(), true)).unwrap();
        session.shutdown();
        session.shutdown();
        session.dispatch(UserAction::StartPairing);
        assert_eq!(session.state().phase, SessionPhase::Idle);
    }
}
