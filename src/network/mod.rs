//! Network subsystem: rendezvous and UDP audio transport

pub mod discovery;
pub mod handshake;
pub mod pairing;
pub mod sender;
pub mod udp;

pub use discovery::{MdnsRegistry, ServiceRecord, ServiceRegistry};
pub use handshake::{encode_connect, parse_connect, HandshakeError};
pub use pairing::{PairingEvent, PairingService, PairingSession, PairingState, PeerEndpoint};
pub use sender::{SenderStats, StreamSender};
