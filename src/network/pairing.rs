//! Rendezvous: advertise, listen for a handshake, resolve the peer
//!
//! ```text
//!  register_service(port, name)
//!        │
//!        ▼
//!  ┌─────────────┐  advertised  ┌──────────────┐  CONNECT:<p> from A  ┌──────────────┐
//!  │ Advertising │ ───────────► │  Listening   │ ───────────────────► │ Paired(A:p)  │
//!  └─────────────┘              └──────────────┘ ◄─── disconnect ──── └──────────────┘
//!                                                                       │  ▲
//!                                                                       └──┘ CONNECT again
//! ```
//!
//! The listener keeps running after a handshake: another valid `CONNECT`
//! replaces the peer. `cleanup` withdraws the advertisement and unblocks the
//! listener by shutting its socket down.

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;

use crate::constants::HANDSHAKE_BUFFER_SIZE;
use crate::error::DiscoveryError;
use crate::network::discovery::{ServiceRecord, ServiceRegistry};
use crate::network::handshake::parse_connect;
use crate::network::udp;

/// Where a paired receiver wants audio sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct PeerEndpoint {
    addr: SocketAddr,
}

impl PeerEndpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum PairingState {
    #[default]
    Unpaired,
    Advertising,
    Listening,
    Paired,
}

/// Published pairing status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PairingSession {
    pub state: PairingState,
    pub peer: Option<PeerEndpoint>,
}

/// Notifications from the listener thread
#[derive(Debug)]
pub enum PairingEvent {
    /// A valid handshake arrived; replaces any earlier peer
    Connected(PeerEndpoint),
    /// The listener died. The advertisement has already been withdrawn.
    Failed(DiscoveryError),
}

pub type PairingEventSink = Arc<dyn Fn(PairingEvent) + Send + Sync>;

struct Listener {
    socket: UdpSocket,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct PairingService {
    registry: Arc<dyn ServiceRegistry>,
    service_type: String,
    read_timeout: Duration,
    session_tx: watch::Sender<PairingSession>,
    events: PairingEventSink,
    /// Advertisement currently published; shared with the listener so a dying
    /// listener can withdraw it
    record: Arc<Mutex<Option<ServiceRecord>>>,
    listener: Option<Listener>,
}

impl PairingService {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        service_type: impl Into<String>,
        read_timeout: Duration,
        events: PairingEventSink,
    ) -> Self {
        let (session_tx, _) = watch::channel(PairingSession::default());
        Self {
            registry,
            service_type: service_type.into(),
            read_timeout,
            session_tx,
            events,
            record: Arc::new(Mutex::new(None)),
            listener: None,
        }
    }

    /// Bind the handshake listener on `port`, advertise the port actually
    /// bound under the fixed service type, then wait for a handshake. Any
    /// previous pairing is torn down first.
    pub fn register_service(&mut self, port: u16, name: &str) -> Result<(), DiscoveryError> {
        self.cleanup();
        self.publish(PairingState::Advertising, None);

        let socket = match udp::bind_listener(port, self.read_timeout) {
            Ok(socket) => socket,
            Err(source) => {
                tracing::error!("Failed to bind handshake listener on {}: {}", port, source);
                self.cleanup();
                return Err(DiscoveryError::Bind { port, source });
            }
        };
        let bound_port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(source) => {
                self.cleanup();
                return Err(DiscoveryError::Listener(source));
            }
        };

        let record = ServiceRecord {
            service_type: self.service_type.clone(),
            name: name.to_string(),
            port: bound_port,
        };
        if let Err(e) = self.registry.register(&record) {
            tracing::error!("Service registration failed: {}", e);
            self.cleanup();
            return Err(e);
        }
        *self.record.lock() = Some(record);

        match self.spawn_listener(socket) {
            Ok(listener) => {
                tracing::info!("Listening for handshake on UDP {}", listener.local_addr);
                self.listener = Some(listener);
                self.publish(PairingState::Listening, None);
                Ok(())
            }
            Err(source) => {
                self.cleanup();
                Err(DiscoveryError::Listener(source))
            }
        }
    }

    fn spawn_listener(&self, socket: UdpSocket) -> io::Result<Listener> {
        let local_addr = socket.local_addr()?;
        let worker_socket = socket.try_clone()?;
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = ListenerWorker {
            socket: worker_socket,
            cancel: cancel.clone(),
            session_tx: self.session_tx.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            record: self.record.clone(),
        };

        let handle = thread::Builder::new()
            .name("handshake-listener".to_string())
            .spawn(move || worker.run())?;

        Ok(Listener {
            socket,
            cancel,
            handle,
            local_addr,
        })
    }

    /// Forget the current peer but keep advertising and listening.
    pub fn disconnect_peer(&mut self) {
        if self.listener.is_some() {
            tracing::info!("Peer disconnected; waiting for a new handshake");
            self.publish(PairingState::Listening, None);
        }
    }

    /// Withdraw the advertisement, stop the listener and reset to unpaired.
    /// Safe to call at any time, any number of times.
    pub fn cleanup(&mut self) {
        let record = self.record.lock().take();
        if let Some(record) = record {
            if let Err(e) = self.registry.unregister(&record) {
                tracing::warn!("Failed to unregister '{}': {}", record.name, e);
            }
        }

        if let Some(listener) = self.listener.take() {
            listener.cancel.store(true, Ordering::SeqCst);
            udp::interrupt(&listener.socket);
            if listener.handle.join().is_err() {
                tracing::error!("Handshake listener panicked");
            }
            tracing::debug!("Handshake listener on {} shut down", listener.local_addr);
        }

        self.publish(PairingState::Unpaired, None);
    }

    fn publish(&self, state: PairingState, peer: Option<PeerEndpoint>) {
        self.session_tx.send_replace(PairingSession { state, peer });
    }

    pub fn session(&self) -> PairingSession {
        self.session_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingSession> {
        self.session_tx.subscribe()
    }

    /// Address the handshake listener is bound to
    pub fn listening_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }
}

impl Drop for PairingService {
    fn drop(&mut self) {
        self.cleanup();
    }
}

struct ListenerWorker {
    socket: UdpSocket,
    cancel: Arc<AtomicBool>,
    session_tx: watch::Sender<PairingSession>,
    events: PairingEventSink,
    registry: Arc<dyn ServiceRegistry>,
    record: Arc<Mutex<Option<ServiceRecord>>>,
}

impl ListenerWorker {
    fn run(self) {
        let mut buf = vec![0u8; HANDSHAKE_BUFFER_SIZE];

        loop {
            let received = self.socket.recv_from(&mut buf);

            if self.cancel.load(Ordering::SeqCst) {
                // Whatever the receive returned, it was caused by cleanup
                tracing::debug!("Handshake listener cancelled");
                return;
            }

            match received {
                Ok((len, from)) if len == buf.len() => {
                    tracing::warn!("Ignoring oversized handshake datagram from {}", from);
                }
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if udp::is_timeout(&e) => continue,
                Err(e) if udp::is_oversized(&e) => {
                    tracing::warn!("Ignoring oversized handshake datagram");
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    tracing::debug!("Ignoring ICMP reset on handshake socket");
                    continue;
                }
                Err(e) => {
                    tracing::error!("Error while listening for handshake: {}", e);
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        tracing::debug!("Handshake datagram ({} bytes) from {}", datagram.len(), from);

        match parse_connect(datagram) {
            Ok(port) => {
                let peer = PeerEndpoint::new(from.ip(), port);
                tracing::info!("Peer {} declared data port {}", from.ip(), port);
                self.session_tx.send_replace(PairingSession {
                    state: PairingState::Paired,
                    peer: Some(peer),
                });
                (self.events)(PairingEvent::Connected(peer));
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring handshake from {}: {} ({:?})",
                    from,
                    e,
                    String::from_utf8_lossy(datagram)
                );
            }
        }
    }

    fn fail(&self, source: io::Error) {
        let record = self.record.lock().take();
        if let Some(record) = record {
            if let Err(e) = self.registry.unregister(&record) {
                tracing::warn!("Failed to unregister '{}': {}", record.name, e);
            }
        }
        self.session_tx.send_replace(PairingSession::default());
        (self.events)(PairingEvent::Failed(DiscoveryError::Listener(source)));
    }
}
