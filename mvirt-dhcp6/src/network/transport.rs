//! Packet transport: raw link-layer multicast and kernel UDP.
//!
//! Before a lease exists (and while rebinding) the client has no usable
//! global address, so it talks to servers through an `AF_PACKET` socket
//! using its link-local address. Once bound, Renew and Release travel over
//! ordinary UDP sockets routed by the kernel.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::net::UdpSocket;

use super::frame::{build_udp6, parse_frame};
use super::interface::Interface;
use crate::error::NetworkError;

/// FF02::1:2, All_DHCP_Relay_Agents_and_Servers.
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Ethernet destination for FF02::1:2 (RFC 2464).
pub const DHCP6_MCAST_MAC: [u8; 6] = [0x33, 0x33, 0x00, 0x01, 0x00, 0x02];

const RECV_BUF_LEN: usize = 1500;

/// Which socket, if any, is open for receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    None,
    Kernel,
    Raw,
}

impl std::fmt::Display for ListenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenMode::None => write!(f, "none"),
            ListenMode::Kernel => write!(f, "kernel"),
            ListenMode::Raw => write!(f, "raw"),
        }
    }
}

/// A DHCPv6 message received from a server.
#[derive(Debug, Clone)]
pub struct Received {
    /// Message bytes starting at the msg-type field.
    pub data: Vec<u8>,
    /// Source address, used as the server address for unicast.
    pub peer: Ipv6Addr,
}

/// Sending side of the transport plus listen-mode control, as seen by the
/// state machine. Receiving is driven by the event loop.
pub trait Transport {
    /// Close the current listening socket, then open one for `mode`.
    fn change_listen_mode(&mut self, mode: ListenMode, iface: &Interface) -> Result<(), NetworkError>;

    fn listen_mode(&self) -> ListenMode;

    /// Send to FF02::1:2 through a raw packet socket.
    fn send_multicast(&mut self, iface: &Interface, payload: &[u8]) -> Result<(), NetworkError>;

    /// Send through a kernel UDP socket, optionally bound to `src`.
    fn send_unicast(
        &mut self,
        iface: &Interface,
        src: Option<Ipv6Addr>,
        dst: Ipv6Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError>;

    /// Re-read interface index, MAC and link-local address.
    fn refresh_interface(&mut self, name: &str) -> Result<Interface, NetworkError>;
}

enum Listener {
    None,
    Raw(AsyncFd<OwnedFd>),
    Kernel(UdpSocket),
}

/// Transport over real sockets.
pub struct LinkTransport {
    client_port: u16,
    server_port: u16,
    mode: ListenMode,
    listener: Listener,
}

impl LinkTransport {
    pub fn new(client_port: u16, server_port: u16) -> Self {
        Self {
            client_port,
            server_port,
            mode: ListenMode::None,
            listener: Listener::None,
        }
    }

    /// Wait for the next message on the listening socket.
    ///
    /// `Ok(None)` means a frame arrived but was not for us. Never completes
    /// while no socket is open. Must be called from within a tokio runtime.
    pub async fn recv(&mut self) -> io::Result<Option<Received>> {
        let mut buf = [0u8; RECV_BUF_LEN];
        match &mut self.listener {
            Listener::None => std::future::pending().await,
            Listener::Kernel(sock) => {
                let (len, peer) = sock.recv_from(&mut buf).await?;
                let SocketAddr::V6(peer) = peer else {
                    debug!("DHCPv6: Ignoring packet from IPv4 peer {}", peer);
                    return Ok(None);
                };
                Ok(Some(Received {
                    data: buf[..len].to_vec(),
                    peer: *peer.ip(),
                }))
            }
            Listener::Raw(afd) => {
                let len = loop {
                    let mut guard = afd.readable_mut().await?;
                    match guard.try_io(|inner| {
                        let fd = inner.get_ref().as_raw_fd();
                        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
                        if n < 0 {
                            Err(io::Error::last_os_error())
                        } else {
                            Ok(n as usize)
                        }
                    }) {
                        Ok(result) => break result?,
                        Err(_would_block) => continue,
                    }
                };
                match parse_frame(&buf[..len], self.client_port) {
                    Ok((peer, range)) => Ok(Some(Received {
                        data: buf[range].to_vec(),
                        peer,
                    })),
                    Err(e) => {
                        debug!("DHCPv6: {}, ignoring", e);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Close and reopen the listening socket in the same mode.
    pub fn reopen(&mut self, iface: &Interface) -> Result<(), NetworkError> {
        self.change_listen_mode(self.mode, iface)
    }
}

impl Transport for LinkTransport {
    fn change_listen_mode(&mut self, mode: ListenMode, iface: &Interface) -> Result<(), NetworkError> {
        debug!("DHCPv6: Entering listen mode: {}", mode);
        self.mode = mode;
        self.listener = Listener::None;
        self.listener = match mode {
            ListenMode::None => Listener::None,
            ListenMode::Kernel => Listener::Kernel(kernel_listen_socket(iface, self.client_port)?),
            ListenMode::Raw => {
                debug!("DHCPv6: Opening raw socket on ifindex {}", iface.index);
                Listener::Raw(AsyncFd::new(raw_socket(iface.index)?)?)
            }
        };
        Ok(())
    }

    fn listen_mode(&self) -> ListenMode {
        self.mode
    }

    fn send_multicast(&mut self, iface: &Interface, payload: &[u8]) -> Result<(), NetworkError> {
        let frame = build_udp6(
            iface.link_local,
            self.client_port,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            self.server_port,
            payload,
        );

        let fd = raw_socket(iface.index)?;
        let mut dest = sockaddr_ll(iface.index);
        dest.sll_halen = 6;
        dest.sll_addr[..6].copy_from_slice(&DHCP6_MCAST_MAC);

        let ret = unsafe {
            libc::sendto(
                fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &dest as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NetworkError::SocketError(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn send_unicast(
        &mut self,
        iface: &Interface,
        src: Option<Ipv6Addr>,
        dst: Ipv6Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let local = SocketAddrV6::new(
            src.unwrap_or(Ipv6Addr::UNSPECIFIED),
            self.client_port,
            0,
            iface.index,
        );
        socket.bind(&local.into())?;
        bind_to_device(socket.as_raw_fd(), &iface.name)?;

        let dest = SocketAddrV6::new(dst, self.server_port, 0, iface.index);
        socket.send_to(payload, &dest.into())?;
        Ok(())
    }

    fn refresh_interface(&mut self, name: &str) -> Result<Interface, NetworkError> {
        Interface::read(name)
    }
}

fn sockaddr_ll(ifindex: u32) -> libc::sockaddr_ll {
    libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: (libc::ETH_P_IPV6 as u16).to_be(),
        sll_ifindex: ifindex as i32,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    }
}

/// Non-blocking `AF_PACKET`/`SOCK_DGRAM` socket bound to the interface
/// and the IPv6 ethertype.
fn raw_socket(ifindex: u32) -> Result<OwnedFd, NetworkError> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            (libc::ETH_P_IPV6 as u16).to_be() as i32,
        )
    };
    if fd < 0 {
        return Err(NetworkError::SocketError(io::Error::last_os_error()));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = sockaddr_ll(ifindex);
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(NetworkError::SocketError(io::Error::last_os_error()));
    }

    Ok(fd)
}

/// UDP socket on the client port, restricted to the interface.
fn kernel_listen_socket(iface: &Interface, port: u16) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, iface.index);
    socket.bind(&addr.into())?;

    bind_to_device(socket.as_raw_fd(), &iface.name)?;

    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn bind_to_device(fd: RawFd, name: &str) -> Result<(), NetworkError> {
    let name = CString::new(name)
        .map_err(|_| NetworkError::NoInterface(name.to_string()))?;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr() as *const libc::c_void,
            name.as_bytes_with_nul().len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        warn!("DHCPv6: SO_BINDTODEVICE failed: {}", err);
        return Err(NetworkError::SocketError(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_mac_matches_group() {
        let octets = ALL_DHCP_RELAY_AGENTS_AND_SERVERS.octets();
        assert_eq!(&DHCP6_MCAST_MAC[2..], &octets[12..]);
    }

    #[test]
    fn test_listen_mode_display() {
        assert_eq!(ListenMode::Raw.to_string(), "raw");
        assert_eq!(ListenMode::Kernel.to_string(), "kernel");
        assert_eq!(ListenMode::None.to_string(), "none");
    }

    #[tokio::test]
    async fn test_new_transport_listens_nowhere() {
        let mut transport = LinkTransport::new(546, 547);
        assert_eq!(transport.listen_mode(), ListenMode::None);
        let recv = tokio::time::timeout(std::time::Duration::from_millis(10), transport.recv()).await;
        assert!(recv.is_err());
    }
}
