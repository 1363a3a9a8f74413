//! Packet type definitions

use std::fmt;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Numeric version as carried in the header nibble
    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP (protocol number 6)
    Tcp,
    /// UDP (protocol number 17)
    Udp,
    /// ICMP (protocol number 1)
    Icmp,
    /// ICMPv6 (protocol number 58)
    Icmpv6,
    /// Any other protocol number
    Other(u8),
}

impl Protocol {
    /// Create from protocol number
    pub fn from_u8(proto: u8) -> Self {
        match proto {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            58 => Protocol::Icmpv6,
            other => Protocol::Other(other),
        }
    }

    /// Get protocol number
    pub fn to_u8(self) -> u8 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmpv6 => 58,
            Protocol::Other(n) => n,
        }
    }
}

/// Common well-known ports
pub mod ports {
    /// DNS port
    pub const DNS: u16 = 53;
    /// HTTP port
    pub const HTTP: u16 = 80;
    /// HTTPS port
    pub const HTTPS: u16 = 443;
}

/// Header size constants
pub mod sizes {
    /// Minimum IPv4 header (IHL = 5)
    pub const IPV4_MIN_HEADER: usize = 20;
    /// Fixed IPv6 header
    pub const IPV6_HEADER: usize = 40;
    /// UDP header
    pub const UDP_HEADER: usize = 8;
    /// Minimum TCP header (data offset = 5)
    pub const TCP_MIN_HEADER: usize = 20;
    /// DNS message header
    pub const DNS_HEADER: usize = 12;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_u8() {
        assert_eq!(Protocol::from_u8(6), Protocol::Tcp);
        assert_eq!(Protocol::from_u8(17), Protocol::Udp);
        assert_eq!(Protocol::from_u8(1), Protocol::Icmp);
        assert_eq!(Protocol::from_u8(58), Protocol::Icmpv6);
        assert_eq!(Protocol::from_u8(99), Protocol::Other(99));
        assert_eq!(Protocol::from_u8(0), Protocol::Other(0));
    }

    #[test]
    fn test_protocol_roundtrip() {
        for n in [1u8, 6, 17, 58, 47, 255] {
            assert_eq!(Protocol::from_u8(n).to_u8(), n);
        }
    }

    #[test]
    fn test_ip_version_display() {
        assert_eq!(IpVersion::V4.to_string(), "IPv4");
        assert_eq!(IpVersion::V6.number(), 6);
    }
}
