//! Packet builder utilities

use super::{sizes, PacketParser, PacketView, MAX_PACKET_SIZE};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Builder for IPv4/UDP datagrams written back into the tunnel
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    identification: Option<u16>,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Create new IPv4 UDP packet builder
    pub fn udp_v4() -> Self {
        Self {
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            dst_port: 0,
            ttl: 64,
            identification: None,
            payload: Vec::new(),
        }
    }

    /// Start a reply to `query` with addresses and ports swapped
    ///
    /// Returns `None` for anything but IPv4.
    pub fn reply_to(query: &PacketView<'_>) -> Option<Self> {
        let (src, dst) = query.ipv4_addrs()?;
        Some(
            Self::udp_v4()
                .src(dst)
                .dst(src)
                .src_port(query.dest_port)
                .dst_port(query.source_port),
        )
    }

    /// Set source IP
    #[must_use]
    pub fn src(mut self, ip: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self
    }

    /// Set destination IP
    #[must_use]
    pub fn dst(mut self, ip: Ipv4Addr) -> Self {
        self.dst_ip = ip;
        self
    }

    /// Set source port
    #[must_use]
    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    /// Set destination port
    #[must_use]
    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    /// Set TTL
    #[must_use]
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set a fixed IP identification (random when unset)
    #[must_use]
    pub fn identification(mut self, id: u16) -> Self {
        self.identification = Some(id);
        self
    }

    /// Set payload
    #[must_use]
    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the packet with both checksums filled in
    pub fn build(self) -> Result<BytesMut> {
        let udp_len = sizes::UDP_HEADER + self.payload.len();
        let total_len = sizes::IPV4_MIN_HEADER + udp_len;
        if total_len > MAX_PACKET_SIZE {
            return Err(Error::PacketTooLarge {
                size: total_len,
                max: MAX_PACKET_SIZE,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let (total_len_u16, udp_len_u16) = (total_len as u16, udp_len as u16);

        let identification = self.identification.unwrap_or_else(rand::random);
        let mut packet = BytesMut::with_capacity(total_len);

        // IPv4 header
        packet.put_u8(0x45); // Version (4) + IHL (5)
        packet.put_u8(0x00); // DSCP + ECN
        packet.put_u16(total_len_u16);
        packet.put_u16(identification);
        packet.put_u16(0x4000); // Flags (DF) + Fragment Offset
        packet.put_u8(self.ttl);
        packet.put_u8(17); // Protocol (UDP)
        packet.put_u16(0); // Header Checksum (placeholder)
        packet.put_slice(&self.src_ip.octets());
        packet.put_slice(&self.dst_ip.octets());

        let header_checksum = PacketParser::ipv4_header_checksum(&packet[..sizes::IPV4_MIN_HEADER]);
        packet[10..12].copy_from_slice(&header_checksum.to_be_bytes());

        // UDP header
        packet.put_u16(self.src_port);
        packet.put_u16(self.dst_port);
        packet.put_u16(udp_len_u16);
        packet.put_u16(0); // Checksum (placeholder)
        packet.put_slice(&self.payload);

        let udp_checksum = PacketParser::udp_checksum_ipv4(
            &self.src_ip.octets(),
            &self.dst_ip.octets(),
            &packet[sizes::IPV4_MIN_HEADER..],
        );
        packet[26..28].copy_from_slice(&udp_checksum.to_be_bytes());

        Ok(packet)
    }
}
