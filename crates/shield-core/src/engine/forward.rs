//! Upstream DNS forwarding
//!
//! Allowed queries are relayed verbatim to a filtering resolver over plain
//! UDP. Each attempt uses a fresh socket so answers can never cross between
//! clients.

use crate::error::{Error, Result};
use crate::packet::dns;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// Largest answer accepted from upstream
const MAX_UDP_DNS_SIZE: usize = 4096;

/// Grace period added on top of the per-attempt timeouts
const FORWARD_GRACE: Duration = Duration::from_millis(500);

/// Upstream resolver settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Resolvers in order of preference
    pub servers: Vec<SocketAddr>,
    /// Timeout of a single attempt
    pub attempt_timeout: Duration,
    /// Try the next server when the first fails
    pub retry_secondary: bool,
    /// Firewall mark set on upstream sockets (Linux)
    pub fwmark: Option<u32>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            servers: vec![
                SocketAddr::from((Ipv4Addr::new(1, 1, 1, 3), 53)),
                SocketAddr::from((Ipv4Addr::new(1, 0, 0, 3), 53)),
            ],
            attempt_timeout: Duration::from_millis(2000),
            retry_secondary: true,
            fwmark: None,
        }
    }
}

impl UpstreamSettings {
    /// Overall forward budget covering every attempt
    pub fn default_forward_timeout(&self) -> Duration {
        let attempts = if self.retry_secondary {
            u32::try_from(self.servers.len().max(1)).unwrap_or(u32::MAX)
        } else {
            1
        };
        self.attempt_timeout.saturating_mul(attempts) + FORWARD_GRACE
    }
}

/// Trait for upstream DNS resolution
///
/// Takes the raw query payload and returns the raw answer payload.
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolve a query
    fn resolve(&self, query: Bytes) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Resolver that forwards over UDP to the configured servers
#[derive(Debug, Clone)]
pub struct UdpResolver {
    settings: UpstreamSettings,
}

impl UdpResolver {
    /// Create a resolver
    pub fn new(settings: UpstreamSettings) -> Self {
        Self { settings }
    }

    /// Resolver settings
    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    fn bind(&self, server: SocketAddr) -> std::io::Result<UdpSocket> {
        let (domain, local) = match server {
            SocketAddr::V4(_) => (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
            SocketAddr::V6(_) => (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))),
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let Some(mark) = self.settings.fwmark {
            socket.set_mark(mark)?;
        }

        socket.bind(&local.into())?;
        UdpSocket::from_std(socket.into())
    }

    async fn exchange(&self, server: SocketAddr, query: &[u8], txid: Option<u16>) -> Result<Bytes> {
        let io_err = |e: std::io::Error| Error::Upstream {
            server,
            reason: e.to_string(),
        };

        let socket = self.bind(server).map_err(io_err)?;
        socket.connect(server).await.map_err(io_err)?;
        socket.send(query).await.map_err(io_err)?;

        let mut buf = vec![0u8; MAX_UDP_DNS_SIZE];
        loop {
            let len = socket.recv(&mut buf).await.map_err(io_err)?;
            let answer = &buf[..len];
            if txid.is_none() || dns::transaction_id(answer) == txid {
                return Ok(Bytes::copy_from_slice(answer));
            }
            trace!(%server, "Ignoring answer with foreign transaction id");
        }
    }

    async fn attempt(&self, server: SocketAddr, query: &[u8], txid: Option<u16>) -> Result<Bytes> {
        tokio::time::timeout(self.settings.attempt_timeout, self.exchange(server, query, txid))
            .await
            .map_err(|_| Error::UpstreamTimeout { server })?
    }
}

impl Default for UdpResolver {
    fn default() -> Self {
        Self::new(UpstreamSettings::default())
    }
}

impl DnsResolver for UdpResolver {
    async fn resolve(&self, query: Bytes) -> Result<Bytes> {
        let txid = dns::transaction_id(&query);
        let attempts = if self.settings.retry_secondary {
            self.settings.servers.len()
        } else {
            1
        };

        let mut last_error = None;
        for &server in self.settings.servers.iter().take(attempts) {
            match self.attempt(server, &query, txid).await {
                Ok(answer) => {
                    debug!(%server, len = answer.len(), "Upstream answered");
                    return Ok(answer);
                }
                Err(e) => {
                    warn!(%server, error = %e, "Upstream attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::config_value("upstream.servers", "no servers configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::dns::tests::build_query;

    async fn fake_upstream(reply_txid_offset: u16) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let mut answer = buf[..len].to_vec();
            answer[2] |= 0x80;
            if reply_txid_offset != 0 {
                let id = u16::from_be_bytes([answer[0], answer[1]]).wrapping_add(reply_txid_offset);
                let mut foreign = answer.clone();
                foreign[..2].copy_from_slice(&id.to_be_bytes());
                socket.send_to(&foreign, peer).await.unwrap();
            }
            socket.send_to(&answer, peer).await.unwrap();
        });
        (addr, task)
    }

    fn settings(servers: Vec<SocketAddr>, timeout_ms: u64) -> UpstreamSettings {
        UpstreamSettings {
            servers,
            attempt_timeout: Duration::from_millis(timeout_ms),
            retry_secondary: true,
            fwmark: None,
        }
    }

    #[test]
    fn test_default_forward_timeout() {
        let upstream = UpstreamSettings::default();
        assert_eq!(upstream.default_forward_timeout(), Duration::from_millis(4500));

        let single = UpstreamSettings {
            retry_secondary: false,
            ..UpstreamSettings::default()
        };
        assert_eq!(single.default_forward_timeout(), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_resolve_relays_answer() {
        let (addr, task) = fake_upstream(0).await;
        let resolver = UdpResolver::new(settings(vec![addr], 1000));

        let query = build_query(0x4242, "example.com", dns::record_type::A);
        let answer = resolver.resolve(Bytes::from(query.clone())).await.unwrap();

        assert_eq!(dns::transaction_id(&answer), Some(0x4242));
        assert!(dns::is_response(&answer));
        assert_eq!(&answer[12..], &query[12..]);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_skips_foreign_txid() {
        let (addr, task) = fake_upstream(7).await;
        let resolver = UdpResolver::new(settings(vec![addr], 1000));

        let query = build_query(0x0100, "example.org", dns::record_type::A);
        let answer = resolver.resolve(Bytes::from(query)).await.unwrap();
        assert_eq!(dns::transaction_id(&answer), Some(0x0100));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_secondary() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (addr, task) = fake_upstream(0).await;
        let resolver = UdpResolver::new(settings(vec![silent.local_addr().unwrap(), addr], 100));

        let query = build_query(9, "example.net", dns::record_type::AAAA);
        let answer = resolver.resolve(Bytes::from(query)).await.unwrap();
        assert_eq!(dns::transaction_id(&answer), Some(9));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_timeout_without_retry() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        let mut upstream = settings(vec![silent_addr], 50);
        upstream.retry_secondary = false;
        let resolver = UdpResolver::new(upstream);

        let query = build_query(1, "example.com", dns::record_type::A);
        let err = resolver.resolve(Bytes::from(query)).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamTimeout { server } if server == silent_addr));
    }

    #[tokio::test]
    async fn test_resolve_without_servers() {
        let resolver = UdpResolver::new(settings(Vec::new(), 50));
        let err = resolver.resolve(Bytes::from_static(&[0; 12])).await.unwrap_err();
        assert!(matches!(err, Error::ConfigValue { .. }));
    }
}
