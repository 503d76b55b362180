//! UDP socket construction

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, UdpSocket};
use std::time::Duration;

/// Bind the handshake listener on all interfaces.
///
/// The read timeout bounds how long a blocked receive can outlive a
/// cancellation on platforms where shutting the socket down does not wake it.
pub fn bind_listener(port: u16, read_timeout: Duration) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&SockAddr::from(addr))?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(read_timeout))?;
    Ok(socket)
}

/// Create the unconnected socket audio datagrams are sent from.
pub fn create_sender_socket(send_buffer_size: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_send_buffer_size(send_buffer_size) {
        tracing::debug!("Could not set send buffer to {} bytes: {}", send_buffer_size, e);
    }
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&SockAddr::from(addr))?;
    Ok(socket.into())
}

/// Shut a socket down so a thread blocked receiving on it wakes up.
///
/// Unconnected UDP sockets report `NotConnected` here on some platforms even
/// though the wakeup happens, so the result is ignored.
pub fn interrupt(socket: &UdpSocket) {
    if let Err(e) = SockRef::from(socket).shutdown(Shutdown::Both) {
        tracing::trace!("UDP shutdown: {}", e);
    }
}

/// Whether a receive error only means the read timeout elapsed.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Whether a receive failed because the datagram did not fit the buffer.
/// Windows reports `WSAEMSGSIZE`; other platforms truncate silently.
pub fn is_oversized(err: &io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    cfg!(windows) && err.raw_os_error() == Some(WSAEMSGSIZE)
}
