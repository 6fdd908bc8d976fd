//! Socket binding helpers.
//!
//! Both helpers create the socket through `nix` so that `SO_REUSEADDR` and
//! `IPV6_V6ONLY` are set before `bind`, then hand back a non-blocking std
//! socket ready for `tokio::net::*::from_std`.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::OwnedFd;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};

fn open_bound(addr: SocketAddr, ty: SockType, proto: SockProtocol) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(family, ty, SockFlag::SOCK_CLOEXEC, proto)?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;

    match addr {
        SocketAddr::V4(v4) => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4))?;
        }
        SocketAddr::V6(v6) => {
            socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)?;
            socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6))?;
        }
    }

    Ok(fd)
}

/// Bind a non-blocking TCP listener for the HTTP server.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let fd = open_bound(addr, SockType::Stream, SockProtocol::Tcp)?;
    socket::listen(&fd, Backlog::MAXCONN)?;

    // SAFETY: `fd` is a freshly created, bound and listening TCP socket we own.
    let listener = unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind a non-blocking UDP socket for the control relay.
pub fn bind_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let fd = open_bound(addr, SockType::Datagram, SockProtocol::Udp)?;

    // SAFETY: `fd` is a freshly created and bound UDP socket we own.
    let socket = unsafe { UdpSocket::from_raw_fd(fd.into_raw_fd()) };
    socket.set_nonblocking(true)?;
    Ok(socket)
}
