//! UDP audio sender
//!
//! Frames are handed to a single worker thread over a bounded queue, so the
//! capture callback never blocks on the network and datagrams leave in
//! submission order. Each frame becomes exactly one datagram of its valid
//! bytes, with no header.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::frame::PcmFrame;
use crate::constants::SEND_BUFFER_SIZE;
use crate::error::NetworkError;
use crate::network::pairing::PeerEndpoint;
use crate::network::udp;

/// Sender statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    /// Frames discarded because the send queue was full
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    frames_dropped: AtomicU64,
}

struct SendPath {
    queue: Sender<PcmFrame>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    local_addr: Option<SocketAddr>,
}

struct Inner {
    target: Arc<RwLock<Option<SocketAddr>>>,
    path: Mutex<Option<SendPath>>,
    active: AtomicBool,
    queue_capacity: usize,
    counters: Arc<Counters>,
}

/// Handle to the audio sender. Clones share the same stream.
#[derive(Clone)]
pub struct StreamSender {
    inner: Arc<Inner>,
}

impl StreamSender {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                target: Arc::new(RwLock::new(None)),
                path: Mutex::new(None),
                active: AtomicBool::new(false),
                queue_capacity: queue_capacity.max(1),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Replace the destination wholesale.
    pub fn set_target(&self, endpoint: PeerEndpoint) {
        *self.inner.target.write() = Some(endpoint.socket_addr());
        tracing::debug!("Stream target set to {}", endpoint);
    }

    /// Drop the destination; frames are discarded until a new one is set.
    pub fn clear_target(&self) {
        *self.inner.target.write() = None;
    }

    pub fn target(&self) -> Option<SocketAddr> {
        *self.inner.target.read()
    }

    /// Open the socket and start the send worker. No-op if already active.
    pub fn start(&self) -> Result<(), NetworkError> {
        let mut path = self.inner.path.lock();
        if path.is_some() {
            tracing::debug!("Stream sender already active");
            return Ok(());
        }

        let socket = udp::create_sender_socket(SEND_BUFFER_SIZE)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let local_addr = socket.local_addr().ok();

        let (queue, frames) = bounded::<PcmFrame>(self.inner.queue_capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let target = self.inner.target.clone();
        let counters = self.inner.counters.clone();

        let handle = thread::Builder::new()
            .name("udp-sender".to_string())
            .spawn(move || {
                for frame in frames.iter() {
                    if worker_cancel.load(Ordering::Acquire) {
                        break;
                    }
                    transmit(&socket, &target, &counters, &frame);
                }
                // Socket closes when dropped here
            })
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        *path = Some(SendPath {
            queue,
            cancel,
            handle,
            local_addr,
        });
        self.inner.active.store(true, Ordering::SeqCst);

        match self.target() {
            Some(target) => tracing::info!("Streaming started to {}", target),
            None => tracing::info!("Streaming started (no target yet)"),
        }
        Ok(())
    }

    /// Close the socket and discard anything still queued.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);

        let Some(path) = self.inner.path.lock().take() else {
            return;
        };

        path.cancel.store(true, Ordering::Release);
        drop(path.queue);
        if path.handle.join().is_err() {
            tracing::error!("Sender worker panicked");
        }

        let stats = self.stats();
        tracing::info!(
            "Streaming stopped: {} packets, {:.1} KB sent, {} failures, {} dropped",
            stats.packets_sent,
            stats.bytes_sent as f64 / 1024.0,
            stats.send_failures,
            stats.frames_dropped
        );
    }

    /// Queue one frame. Silently ignored unless active with a target.
    pub fn send(&self, frame: &PcmFrame) {
        if !self.inner.active.load(Ordering::Acquire) || self.target().is_none() {
            return;
        }

        let path = self.inner.path.lock();
        let Some(path) = path.as_ref() else {
            return;
        };

        match path.queue.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.inner.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                if dropped % 100 == 0 {
                    tracing::warn!("Send queue full, dropping frames ({} so far)", dropped + 1);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Local address of the sending socket while active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.path.lock().as_ref().and_then(|p| p.local_addr)
    }

    pub fn stats(&self) -> SenderStats {
        let c = &self.inner.counters;
        SenderStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

fn transmit(
    socket: &UdpSocket,
    target: &RwLock<Option<SocketAddr>>,
    counters: &Counters,
    frame: &PcmFrame,
) {
    // Read at send time so a retarget never hits the old peer
    let Some(target) = *target.read() else {
        return;
    };

    match socket.send_to(frame.as_bytes(), target) {
        Ok(n) => {
            counters.packets_sent.fetch_add(1, Ordering::Relaxed);
            counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        }
        Err(e) => {
            counters.send_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to send packet to {}: {}", target, e);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(path) = self.path.get_mut().take() {
            path.cancel.store(true, Ordering::Release);
            drop(path.queue);
            let _ = path.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn receiver() -> (UdpSocket, PeerEndpoint) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, PeerEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    fn nothing_arrives(socket: &UdpSocket) -> bool {
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 64];
        socket.recv_from(&mut buf).is_err()
    }

    #[test]
    fn send_is_a_noop_while_inactive_or_untargeted() {
        let (socket, peer) = receiver();
        let sender = StreamSender::new(8);
        let frame = PcmFrame::from_samples(&[1, 2, 3]);

        sender.set_target(peer);
        sender.send(&frame);

        sender.clear_target();
        sender.start().unwrap();
        sender.send(&frame);
        sender.stop();

        assert!(nothing_arrives(&socket));
        assert_eq!(sender.stats(), SenderStats::default());
    }

    #[test]
    fn one_datagram_per_frame_in_order() {
        let (socket, peer) = receiver();
        let sender = StreamSender::new(64);
        sender.set_target(peer);
        sender.start().unwrap();

        let mut scratch = vec![0xEEu8; 64];
        for i in 0..20u8 {
            scratch[..2].copy_from_slice(&[i, 0]);
            // Stale 0xEE tail must not be sent
            sender.send(&PcmFrame::copy_from(&scratch, 2 + (i as usize % 3) * 2));
        }

        let mut buf = [0u8; 128];
        for i in 0..20u8 {
            let (n, _) = socket.recv_from(&mut buf).unwrap();
            assert_eq!(n, 2 + (i as usize % 3) * 2);
            assert_eq!(buf[0], i);
        }

        sender.stop();
        assert_eq!(sender.stats().packets_sent, 20);
    }

    #[test]
    fn start_is_idempotent_and_stop_disables_sending() {
        let (socket, peer) = receiver();
        let sender = StreamSender::new(8);
        sender.set_target(peer);

        sender.start().unwrap();
        let first = sender.local_addr();
        sender.start().unwrap();
        assert_eq!(sender.local_addr(), first);
        assert!(sender.is_active());

        sender.stop();
        assert!(!sender.is_active());
        sender.send(&PcmFrame::from_samples(&[9]));
        assert!(nothing_arrives(&socket));
        sender.stop();
    }

    #[test]
    fn retarget_moves_the_stream() {
        let (old_socket, old_peer) = receiver();
        let (new_socket, new_peer) = receiver();
        let sender = StreamSender::new(8);

        sender.set_target(old_peer);
        sender.start().unwrap();
        sender.send(&PcmFrame::from_samples(&[1]));
        let mut buf = [0u8; 16];
        assert_eq!(old_socket.recv_from(&mut buf).unwrap().0, 2);

        sender.clear_target();
        sender.set_target(new_peer);
        sender.send(&PcmFrame::from_samples(&[2]));
        assert_eq!(new_socket.recv_from(&mut buf).unwrap().0, 2);
        assert!(nothing_arrives(&old_socket));

        sender.stop();
    }
}
