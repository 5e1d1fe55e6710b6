//! Listening socket setup.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

/// Where the responder listens and how many connections may queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerEndpoint {
    addr: SocketAddr,
    backlog: i32,
}

impl ListenerEndpoint {
    /// Resolve `address:port`, taking the first resolved address.
    pub fn resolve(address: &str, port: u16, backlog: u32) -> io::Result<Self> {
        let backlog = i32::try_from(backlog)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let addr = (address, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("'{}' did not resolve to any address", address),
            )
        })?;
        Ok(Self { addr, backlog })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Create the listening socket in blocking mode.
    ///
    /// Only `SO_REUSEADDR` is set (on unix), so a port that already has a
    /// live listener is refused with `AddrInUse`.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(self.addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        #[cfg(unix)]
        socket.set_reuse_address(true)?;
        socket.bind(&self.addr.into())?;
        socket.listen(self.backlog)?;

        Ok(socket.into())
    }
}
