//! Network transport: dialing, connection lifecycle, readiness polling

pub mod connection;
pub mod poll;

pub use connection::{ConnectOutcome, ConnectionManager};
pub use poll::{poll_slots, Interest, PollOutcome, Readiness};

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};

/// A socket returned by [`Dialer::dial`]
pub struct Dialed {
    /// Non-blocking stream
    pub stream: TcpStream,
    /// Connect was initiated but has not completed yet
    pub in_progress: bool,
}

/// Opens non-blocking connections to the destination
pub trait Dialer: Send {
    /// Resolve `host:port` and initiate a non-blocking connect
    fn dial(&mut self, host: &str, port: u16) -> io::Result<Dialed>;
}

/// Production dialer: DNS via the system resolver, TCP via `socket2`
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&mut self, host: &str, port: u16) -> io::Result<Dialed> {
        let mut last_err = None;

        for addr in (host, port).to_socket_addrs()? {
            let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
                Ok(socket) => socket,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            socket.set_nonblocking(true)?;
            if let Err(e) = socket.set_nodelay(true) {
                log::debug!("TCP_NODELAY not set: {}", e);
            }

            match socket.connect(&addr.into()) {
                Ok(()) => {
                    return Ok(Dialed {
                        stream: socket.into(),
                        in_progress: false,
                    })
                }
                Err(e)
                    if e.raw_os_error() == Some(libc::EINPROGRESS)
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return Ok(Dialed {
                        stream: socket.into(),
                        in_progress: true,
                    })
                }
                Err(e) => {
                    log::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}:{}", host, port),
            )
        }))
    }
}
