//! TCP listener construction and bounded accept.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

use super::ShutdownSignal;

/// Listen backlog.
const BACKLOG: i32 = 10;

/// Longest single wait inside the accept loop; keeps shutdown latency low.
const ACCEPT_POLL_SLICE: Duration = Duration::from_millis(100);

/// TCP keep-alive idle time for accepted client streams.
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Build the IPv4 listener: reuse-address, bounded backlog, non-blocking
/// so accepts can time out.
pub fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Put an accepted stream into blocking mode and enable keep-alive. The
/// per-thread read/write timeouts are set by the owning threads.
pub fn configure_client_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    Ok(())
}

/// Accept with a deadline. Returns `Ok(None)` on timeout or when shutdown
/// is requested; waiting happens on the shutdown condition so a broadcast
/// wakes the loop immediately.
pub fn accept_with_timeout(
    listener: &TcpListener,
    shutdown: &ShutdownSignal,
    timeout: Duration,
) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    let deadline = Instant::now() + timeout;
    loop {
        if shutdown.is_set() {
            return Ok(None);
        }
        match listener.accept() {
            Ok(pair) => return Ok(Some(pair)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                shutdown.wait_timeout((deadline - now).min(ACCEPT_POLL_SLICE));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
