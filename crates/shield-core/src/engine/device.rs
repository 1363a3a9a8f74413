//! Virtual interface abstraction
//!
//! The engine only talks to these traits; the platform crate provides the
//! Linux TUN device and an in-memory device for tests.

use crate::error::Result;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Session parameters requested from the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Interface name
    pub name: String,
    /// Local address
    pub address: Ipv4Addr,
    /// Prefix length of the local address
    pub prefix_len: u8,
    /// MTU
    pub mtu: u16,
    /// DNS servers announced for the session
    pub dns_servers: Vec<IpAddr>,
    /// Captured routes, e.g. `1.1.1.3/32`
    pub routes: Vec<String>,
    /// Keep the filter's own sockets out of the tunnel
    pub exclude_self: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        let dns_servers = vec![
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 3)),
            IpAddr::V4(Ipv4Addr::new(1, 0, 0, 3)),
        ];
        Self {
            name: "shield0".to_string(),
            address: Ipv4Addr::new(10, 111, 222, 3),
            prefix_len: 32,
            mtu: 1500,
            routes: host_routes(&dns_servers),
            dns_servers,
            exclude_self: true,
        }
    }
}

/// One host route per DNS server
///
/// Only resolver traffic enters the tunnel; everything else keeps using the
/// regular routes.
pub fn host_routes(servers: &[IpAddr]) -> Vec<String> {
    servers
        .iter()
        .map(|addr| match addr {
            IpAddr::V4(v4) => format!("{v4}/32"),
            IpAddr::V6(v6) => format!("{v6}/128"),
        })
        .collect()
}

/// Check a route in `address/prefix` form
pub fn parse_route(route: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = route.split_once('/')?;
    let addr: IpAddr = addr.trim().parse().ok()?;
    let prefix: u8 = prefix.trim().parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

/// An established virtual interface
///
/// Reads and writes whole IP packets. Implementations must be usable from
/// the reader thread and forwarding tasks at the same time.
pub trait VirtualInterface: Send + Sync {
    /// Read one packet into `buf`; `Ok(0)` means no data yet
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write one packet
    fn send(&self, packet: &[u8]) -> Result<()>;

    /// Release the interface; later reads and writes fail
    fn close(&self) -> Result<()>;

    /// Interface name
    fn name(&self) -> &str;

    /// Interface MTU
    fn mtu(&self) -> u16;
}

/// Creates virtual interfaces (OS VPN API, TUN device, test double)
pub trait InterfaceEstablisher: Send + Sync {
    /// Establish a session; failure is reported, never retried
    fn establish(&self, config: &InterfaceConfig) -> Result<Arc<dyn VirtualInterface>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_default_captures_only_resolvers() {
        let config = InterfaceConfig::default();
        assert_eq!(config.routes, vec!["1.1.1.3/32", "1.0.0.3/32"]);
        assert!(!config.routes.iter().any(|r| r.ends_with("/0")));
    }

    #[test]
    fn test_host_routes_v6() {
        let routes = host_routes(&[IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0, 0, 0, 0, 0, 0x1113))]);
        assert_eq!(routes, vec!["2606:4700::1113/128"]);
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(
            parse_route("1.1.1.3/32"),
            Some((IpAddr::V4(Ipv4Addr::new(1, 1, 1, 3)), 32))
        );
        assert!(parse_route("2606:4700::1113/128").is_some());
        assert!(parse_route("1.1.1.3/33").is_none());
        assert!(parse_route("1.1.1.3").is_none());
        assert!(parse_route("dns/32").is_none());
    }
}
