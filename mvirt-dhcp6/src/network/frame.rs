//! IPv6/UDP framing for the raw packet socket.
//!
//! The socket is `SOCK_DGRAM`, so the kernel adds and strips the Ethernet
//! header; frames here start at the IPv6 header.

use std::net::Ipv6Addr;
use std::ops::Range;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{IpAddress, IpProtocol, Ipv6Packet, Ipv6Repr, UdpPacket, UdpRepr};

pub const IPV6_HEADER_LEN: usize = 40;
pub const UDP_HEADER_LEN: usize = 8;

/// Link-scope hop limit for frames we build.
const HOP_LIMIT: u8 = 1;

/// Why a received frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than the IPv6 and UDP headers.
    TooShort,
    /// IPv6 payload length says more was sent than we read.
    Truncated,
    /// Not IPv6/UDP to our port, or UDP and IPv6 lengths disagree.
    Unrelated,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "packet is too short"),
            FrameError::Truncated => write!(f, "oversized packet"),
            FrameError::Unrelated => write!(f, "unrelated/bogus packet"),
        }
    }
}

/// Build an IPv6 + UDP frame around `payload`.
pub fn build_udp6(
    src: Ipv6Addr,
    src_port: u16,
    dst: Ipv6Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_repr = UdpRepr { src_port, dst_port };

    let ipv6_repr = Ipv6Repr {
        src_addr: src,
        dst_addr: dst,
        next_header: IpProtocol::Udp,
        payload_len: udp_repr.header_len() + payload.len(),
        hop_limit: HOP_LIMIT,
    };

    let mut buffer = vec![0u8; ipv6_repr.buffer_len() + udp_repr.header_len() + payload.len()];

    let mut ipv6_packet = Ipv6Packet::new_unchecked(&mut buffer);
    ipv6_repr.emit(&mut ipv6_packet);

    let mut udp_packet = UdpPacket::new_unchecked(ipv6_packet.payload_mut());
    udp_repr.emit(
        &mut udp_packet,
        &IpAddress::Ipv6(src),
        &IpAddress::Ipv6(dst),
        payload.len(),
        |buf| buf.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );

    buffer
}

/// Validate a frame read from the raw socket.
///
/// Returns the sender address and the byte range of the DHCPv6 message.
/// Bytes past the IPv6 payload length are ignored.
pub fn parse_frame(buf: &[u8], client_port: u16) -> Result<(Ipv6Addr, Range<usize>), FrameError> {
    if buf.len() < IPV6_HEADER_LEN + UDP_HEADER_LEN {
        return Err(FrameError::TooShort);
    }

    let ipv6 = Ipv6Packet::new_unchecked(buf);
    let plen = ipv6.payload_len() as usize;
    if buf.len() < IPV6_HEADER_LEN + plen {
        return Err(FrameError::Truncated);
    }
    let end = IPV6_HEADER_LEN + plen;

    let udp = UdpPacket::new_unchecked(&buf[IPV6_HEADER_LEN..]);
    if ipv6.next_header() != IpProtocol::Udp
        || ipv6.version() != 6
        || udp.dst_port() != client_port
        || udp.len() as usize != plen
    {
        return Err(FrameError::Unrelated);
    }

    let start = IPV6_HEADER_LEN + UDP_HEADER_LEN;
    if end < start {
        return Err(FrameError::Unrelated);
    }

    Ok((ipv6.src_addr(), start..end))
}
