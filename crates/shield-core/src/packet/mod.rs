//! Packet parsing and construction
//!
//! Borrowed, allocation-free views over raw IP packets read from the virtual
//! interface, the DNS query codec, and a builder for the UDP replies the engine
//! writes back.

mod builder;
pub mod dns;
mod parser;
mod types;

pub use builder::PacketBuilder;
pub use dns::{DnsFlags, DnsQuery};
pub use parser::PacketParser;
pub use types::*;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Maximum IPv4 datagram size
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Maximum hostname length (DNS standard)
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Recoverable per-packet parse failure
///
/// Never allocates, so it can be produced on the hot path for every junk
/// packet without pressure on the allocator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer ended before a required field
    #[error("truncated packet: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Version nibble is neither 4 nor 6
    #[error("unknown IP version {0}")]
    UnknownVersion(u8),

    /// Header length field below the protocol minimum
    #[error("invalid header length {0}")]
    InvalidHeaderLength(usize),

    /// IPv4 total length smaller than its own header
    #[error("invalid total length {0}")]
    InvalidTotalLength(usize),

    /// DNS payload could not be decoded
    #[error("malformed DNS message: {0}")]
    Dns(&'static str),
}

/// Parsed view over a single packet
///
/// Holds only offsets and copied header scalars; the payload is borrowed from
/// the read buffer and the view cannot outlive it.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    data: &'a [u8],
    /// IP version
    pub ip_version: IpVersion,
    /// Transport protocol
    pub protocol: Protocol,
    /// Source IP address
    pub source_addr: IpAddr,
    /// Destination IP address
    pub dest_addr: IpAddr,
    /// Source port (UDP/TCP, otherwise 0)
    pub source_port: u16,
    /// Destination port (UDP/TCP, otherwise 0)
    pub dest_port: u16,
    /// Offset of the transport payload
    pub payload_offset: usize,
    /// Length of the transport payload
    pub payload_length: usize,
    fragmented: bool,
}

/// Parse a raw IP packet
///
/// IPv6 packets are only parsed up to the fixed header: they are passed through
/// by the engine and their payload is never inspected for DNS.
pub fn parse(buffer: &[u8]) -> Result<PacketView<'_>, ParseError> {
    let first = *buffer.first().ok_or(ParseError::Truncated {
        needed: 1,
        actual: 0,
    })?;

    match first >> 4 {
        4 => parse_ipv4(buffer),
        6 => parse_ipv6(buffer),
        version => Err(ParseError::UnknownVersion(version)),
    }
}

/// More-fragments bit of the IPv4 flags/fragment word
const IPV4_MORE_FRAGMENTS: u16 = 0x2000;

fn parse_ipv4(data: &[u8]) -> Result<PacketView<'_>, ParseError> {
    ensure_len(data, sizes::IPV4_MIN_HEADER)?;

    let header_len = usize::from(data[0] & 0x0F) * 4;
    if header_len < sizes::IPV4_MIN_HEADER {
        return Err(ParseError::InvalidHeaderLength(header_len));
    }
    ensure_len(data, header_len)?;

    // Trim link-layer padding but refuse packets cut short
    let total_len = usize::from(read_u16(data, 2)?);
    if total_len < header_len {
        return Err(ParseError::InvalidTotalLength(total_len));
    }
    ensure_len(data, total_len)?;
    let end = total_len;

    let protocol = Protocol::from_u8(data[9]);
    let source_addr = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    let dest_addr = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));

    let mut view = PacketView {
        data,
        ip_version: IpVersion::V4,
        protocol,
        source_addr,
        dest_addr,
        source_port: 0,
        dest_port: 0,
        payload_offset: header_len,
        payload_length: end - header_len,
        fragmented: false,
    };

    let flags_fragment = read_u16(data, 6)?;
    let fragment_offset = flags_fragment & 0x1FFF;
    view.fragmented = fragment_offset != 0 || flags_fragment & IPV4_MORE_FRAGMENTS != 0;

    // Non-first fragments carry no transport header
    if fragment_offset == 0 {
        parse_transport(&mut view, &data[..end], header_len)?;
    }

    Ok(view)
}

fn parse_ipv6(data: &[u8]) -> Result<PacketView<'_>, ParseError> {
    ensure_len(data, sizes::IPV6_HEADER)?;

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);

    let declared = usize::from(read_u16(data, 4)?);
    let available = data.len() - sizes::IPV6_HEADER;

    Ok(PacketView {
        data,
        ip_version: IpVersion::V6,
        protocol: Protocol::from_u8(data[6]),
        source_addr: IpAddr::V6(Ipv6Addr::from(src)),
        dest_addr: IpAddr::V6(Ipv6Addr::from(dst)),
        source_port: 0,
        dest_port: 0,
        payload_offset: sizes::IPV6_HEADER,
        payload_length: declared.min(available),
        fragmented: false,
    })
}

fn parse_transport(
    view: &mut PacketView<'_>,
    data: &[u8],
    offset: usize,
) -> Result<(), ParseError> {
    match view.protocol {
        Protocol::Udp => {
            ensure_len(data, offset + sizes::UDP_HEADER)?;
            view.source_port = read_u16(data, offset)?;
            view.dest_port = read_u16(data, offset + 2)?;

            let mut end = data.len();
            let udp_len = usize::from(read_u16(data, offset + 4)?);
            if udp_len >= sizes::UDP_HEADER && offset + udp_len <= end {
                end = offset + udp_len;
            }
            view.payload_offset = offset + sizes::UDP_HEADER;
            view.payload_length = end - view.payload_offset;
        }
        Protocol::Tcp => {
            ensure_len(data, offset + sizes::TCP_MIN_HEADER)?;
            view.source_port = read_u16(data, offset)?;
            view.dest_port = read_u16(data, offset + 2)?;

            let data_offset = usize::from(data[offset + 12] >> 4) * 4;
            if data_offset < sizes::TCP_MIN_HEADER {
                return Err(ParseError::InvalidHeaderLength(data_offset));
            }
            ensure_len(data, offset + data_offset)?;
            view.payload_offset = offset + data_offset;
            view.payload_length = data.len() - view.payload_offset;
        }
        _ => {}
    }

    Ok(())
}

fn ensure_len(data: &[u8], needed: usize) -> Result<(), ParseError> {
    if data.len() < needed {
        return Err(ParseError::Truncated {
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(ParseError::Truncated {
            needed: offset + 2,
            actual: data.len(),
        }),
    }
}

impl<'a> PacketView<'a> {
    /// Get the transport payload
    pub fn payload(&self) -> &'a [u8] {
        self.data
            .get(self.payload_offset..self.payload_offset + self.payload_length)
            .unwrap_or(&[])
    }

    /// Get the whole packet as read
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Get total packet length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if packet is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is IPv4
    pub fn is_ipv4(&self) -> bool {
        matches!(self.ip_version, IpVersion::V4)
    }

    /// Check if this is IPv6
    pub fn is_ipv6(&self) -> bool {
        matches!(self.ip_version, IpVersion::V6)
    }

    /// Check if this is a UDP packet
    pub fn is_udp(&self) -> bool {
        matches!(self.protocol, Protocol::Udp)
    }

    /// Check if this is a TCP packet
    pub fn is_tcp(&self) -> bool {
        matches!(self.protocol, Protocol::Tcp)
    }

    /// Part of a fragmented IPv4 datagram
    pub fn is_fragment(&self) -> bool {
        self.fragmented
    }

    /// Unfragmented IPv4 UDP datagram addressed to port 53
    ///
    /// A first fragment only holds part of the DNS message, so fragments are
    /// never treated as queries.
    pub fn is_dns_query(&self) -> bool {
        self.is_ipv4() && self.is_udp() && !self.fragmented && self.dest_port == ports::DNS
    }

    /// Source and destination as IPv4 addresses
    pub fn ipv4_addrs(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        match (self.source_addr, self.dest_addr) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => Some((src, dst)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_dns_packet() -> Vec<u8> {
        let payload = [0xAB, 0xCD, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0];
        PacketBuilder::udp_v4()
            .src(Ipv4Addr::new(10, 111, 222, 3))
            .dst(Ipv4Addr::new(1, 1, 1, 3))
            .src_port(40000)
            .dst_port(53)
            .payload(&payload)
            .build()
            .unwrap()
            .to_vec()
    }

    fn create_test_tcp_packet() -> Vec<u8> {
        vec![
            // IPv4 header (20 bytes)
            0x45, 0x00, 0x00, 0x28, // Version, IHL, TOS, Total Length
            0x00, 0x01, 0x00, 0x00, // ID, Flags, Fragment
            0x40, 0x06, 0x00, 0x00, // TTL, Protocol (TCP), Checksum
            0xC0, 0xA8, 0x01, 0x01, // Source IP (192.168.1.1)
            0xC0, 0xA8, 0x01, 0x02, // Dest IP (192.168.1.2)
            // TCP header (20 bytes)
            0x00, 0x50, 0x01, 0xBB, // Src Port (80), Dst Port (443)
            0x00, 0x00, 0x00, 0x01, // Sequence Number
            0x00, 0x00, 0x00, 0x01, // Ack Number
            0x50, 0x18, 0x00, 0x00, // Data Offset, Flags (ACK+PSH), Window
            0x00, 0x00, 0x00, 0x00, // Checksum, Urgent Pointer
        ]
    }

    #[test]
    fn test_parse_udp_dns() {
        let data = udp_dns_packet();
        let view = parse(&data).unwrap();

        assert!(view.is_ipv4());
        assert!(view.is_udp());
        assert!(view.is_dns_query());
        assert_eq!(view.source_port, 40000);
        assert_eq!(view.dest_port, 53);
        assert_eq!(view.payload_offset, 28);
        assert_eq!(view.payload_length, 13);
        assert_eq!(view.payload()[0], 0xAB);
    }

    #[test]
    fn test_parse_tcp() {
        let data = create_test_tcp_packet();
        let view = parse(&data).unwrap();

        assert!(view.is_tcp());
        assert!(!view.is_dns_query());
        assert_eq!(view.source_port, 80);
        assert_eq!(view.dest_port, 443);
        assert_eq!(view.payload_length, 0);
    }

    #[test]
    fn test_one_byte_buffer() {
        assert_eq!(
            parse(&[0x45]).unwrap_err(),
            ParseError::Truncated {
                needed: 20,
                actual: 1
            }
        );
    }

    #[test]
    fn test_empty_buffer() {
        assert!(matches!(parse(&[]), Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_version() {
        let mut data = udp_dns_packet();
        data[0] = 0x95;
        assert_eq!(parse(&data).unwrap_err(), ParseError::UnknownVersion(9));
    }

    #[test]
    fn test_header_length_exceeds_buffer() {
        let mut data = udp_dns_packet();
        data[0] = 0x4F; // 60-byte header
        data.truncate(40);
        assert!(matches!(
            parse(&data),
            Err(ParseError::Truncated { needed: 60, .. })
        ));
    }

    #[test]
    fn test_header_length_below_minimum() {
        let mut data = udp_dns_packet();
        data[0] = 0x43;
        assert_eq!(
            parse(&data).unwrap_err(),
            ParseError::InvalidHeaderLength(12)
        );
    }

    #[test]
    fn test_udp_header_truncated() {
        let mut data = udp_dns_packet();
        data.truncate(24);
        data[2] = 0;
        data[3] = 24;
        assert!(matches!(parse(&data), Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_total_length_trims_padding() {
        let mut data = udp_dns_packet();
        let original = data.len();
        data.extend_from_slice(&[0u8; 6]);
        let view = parse(&data).unwrap();
        assert_eq!(view.payload_offset + view.payload_length, original);
    }

    #[test]
    fn test_ipv6_passthrough_view() {
        let mut data = vec![0u8; 48];
        data[0] = 0x60;
        data[5] = 8; // payload length
        data[6] = 17; // UDP
        let view = parse(&data).unwrap();
        assert!(view.is_ipv6());
        assert!(view.is_udp());
        assert!(!view.is_dns_query());
        assert_eq!(view.payload_offset, 40);
        assert_eq!(view.payload_length, 8);
    }

    #[test]
    fn test_first_fragment_is_not_a_query() {
        let mut data = udp_dns_packet();
        data[6] = 0x20; // MF set, offset 0
        data[7] = 0x00;
        let view = parse(&data).unwrap();
        assert_eq!(view.dest_port, 53);
        assert!(view.is_fragment());
        assert!(!view.is_dns_query());

        // DF alone is not fragmentation
        data[6] = 0x40;
        let view = parse(&data).unwrap();
        assert!(!view.is_fragment());
        assert!(view.is_dns_query());
    }

    #[test]
    fn test_non_first_fragment_skips_transport() {
        let mut data = udp_dns_packet();
        data[6] = 0x00;
        data[7] = 0x10;
        let view = parse(&data).unwrap();
        assert_eq!(view.dest_port, 0);
        assert!(!view.is_dns_query());
    }
}
