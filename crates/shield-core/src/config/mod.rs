//! Configuration management for Shield
//!
//! Provides a strongly-typed configuration system with TOML support
//! and age-group presets.

mod preset;

pub use preset::Preset;

use crate::engine::{
    host_routes, parse_route, BlockMode, EngineSettings, InterfaceConfig, UpstreamSettings,
    IN_FLIGHT_MARGIN,
};
use crate::error::{Error, Result};
use crate::policy::{validate_pattern, ListType, PolicyStore, Profile, TomlPolicyFile};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Smallest MTU every IPv4 host must accept
pub const MIN_MTU: u16 = 576;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preset this configuration was generated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,

    /// General application settings
    pub general: GeneralConfig,

    /// Virtual interface settings
    pub tunnel: TunnelConfig,

    /// Upstream resolver settings
    pub upstream: UpstreamConfig,

    /// Lists and policy files
    pub policy: PolicyConfig,

    /// Initial active profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Performance tuning
    pub performance: PerformanceConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Create configuration from a preset
    pub fn from_preset(preset: Preset) -> Self {
        preset.into_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.tunnel.mtu < MIN_MTU {
            return Err(Error::config_value(
                "tunnel.mtu",
                format!("Must be between {MIN_MTU} and 65535"),
            ));
        }
        if self.tunnel.prefix_len > 32 {
            return Err(Error::config_value(
                "tunnel.prefix_len",
                "Must be between 0 and 32",
            ));
        }
        if self.tunnel.dns_servers.is_empty() {
            return Err(Error::config_value(
                "tunnel.dns_servers",
                "At least one DNS server is required",
            ));
        }

        if let Some(route) = self.tunnel.routes.iter().find(|r| parse_route(r).is_none()) {
            return Err(Error::config_value(
                "tunnel.routes",
                format!("Invalid route {route:?}, expected address/prefix"),
            ));
        }

        if self.upstream.servers.is_empty() {
            return Err(Error::config_value(
                "upstream.servers",
                "At least one upstream resolver is required",
            ));
        }
        if let Some(server) = self.upstream.servers.iter().find(|s| s.port() == 0) {
            return Err(Error::config_value(
                "upstream.servers",
                format!("Resolver {server} has port 0"),
            ));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(Error::config_value(
                "upstream.timeout_ms",
                "Must be greater than 0",
            ));
        }

        if self.performance.read_buffer_size < usize::from(self.tunnel.mtu) {
            return Err(Error::config_value(
                "performance.read_buffer_size",
                format!("Must be at least the MTU ({})", self.tunnel.mtu),
            ));
        }
        if self.performance.in_flight_ttl_secs == 0 {
            return Err(Error::config_value(
                "performance.in_flight_ttl_secs",
                "Must be greater than 0",
            ));
        }
        if self.performance.forward_timeout_ms == Some(0) {
            return Err(Error::config_value(
                "performance.forward_timeout_ms",
                "Must be greater than 0",
            ));
        }
        if self.performance.max_consecutive_write_failures == 0 {
            return Err(Error::config_value(
                "performance.max_consecutive_write_failures",
                "Must be at least 1",
            ));
        }

        if let Some(profile) = &self.profile {
            profile.validate()?;
        }

        for pattern in self.policy.blocklist.iter().chain(&self.policy.allowlist) {
            validate_pattern(pattern)?;
        }

        Ok(())
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Engine settings derived from this configuration
    pub fn engine_settings(&self) -> EngineSettings {
        let upstream = UpstreamSettings {
            servers: self.upstream.servers.clone(),
            attempt_timeout: Duration::from_millis(self.upstream.timeout_ms),
            retry_secondary: self.upstream.retry_secondary,
            fwmark: self.upstream.fwmark,
        };
        let forward_timeout = self
            .performance
            .forward_timeout_ms
            .map_or_else(|| upstream.default_forward_timeout(), Duration::from_millis);

        EngineSettings {
            interface: InterfaceConfig {
                name: self.tunnel.interface_name.clone(),
                address: self.tunnel.address,
                prefix_len: self.tunnel.prefix_len,
                mtu: self.tunnel.mtu,
                dns_servers: self.tunnel.dns_servers.clone(),
                routes: self.tunnel.effective_routes(),
                exclude_self: self.tunnel.exclude_self,
            },
            block_mode: self.tunnel.block_mode,
            sinkhole_ipv4: self.tunnel.sinkhole_ipv4,
            read_buffer_size: self.performance.read_buffer_size,
            idle_backoff: Duration::from_millis(self.performance.idle_backoff_ms),
            max_consecutive_write_failures: self.performance.max_consecutive_write_failures,
            // A forward must never be purged while it is still within its budget
            in_flight_ttl: Duration::from_secs(self.performance.in_flight_ttl_secs)
                .max(forward_timeout + IN_FLIGHT_MARGIN),
            forward_timeout,
            upstream,
        }
    }

    /// Populate a policy store from the store file, list files, inline
    /// entries and the configured profile
    ///
    /// Missing list files are skipped with a warning.
    pub fn apply_policy(&self, store: &PolicyStore) -> Result<()> {
        if let Some(path) = &self.policy.store_file {
            store.load_from(&TomlPolicyFile::new(path))?;
        }

        for (path, list_type) in [
            (&self.policy.blocklist_file, ListType::Block),
            (&self.policy.allowlist_file, ListType::Allow),
        ] {
            let Some(path) = path else { continue };
            if path.exists() {
                store.load_list_file(path, list_type)?;
            } else {
                warn!(path = %path.display(), list = %list_type, "List file not found");
            }
        }

        store.add_entries(self.policy.blocklist.iter().map(String::as_str), ListType::Block)?;
        store.add_entries(self.policy.allowlist.iter().map(String::as_str), ListType::Allow)?;

        if let Some(profile) = &self.profile {
            store.upsert_profile(profile.clone())?;
        }

        info!(
            blocked = store.entries(ListType::Block).len(),
            allowed = store.entries(ListType::Allow).len(),
            profile = ?store.active_profile().map(|p| p.name),
            "Policy ready"
        );
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Configuration name
    pub name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

/// Virtual interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Interface name
    pub interface_name: String,
    /// Local address of the interface
    pub address: Ipv4Addr,
    /// Prefix length of the local address
    pub prefix_len: u8,
    /// Interface MTU
    pub mtu: u16,
    /// DNS servers announced for the session
    pub dns_servers: Vec<IpAddr>,
    /// Routes captured by the interface (empty = one host route per DNS server)
    pub routes: Vec<String>,
    /// Keep the filter's own upstream traffic out of the tunnel
    pub exclude_self: bool,
    /// Response to blocked queries
    pub block_mode: BlockMode,
    /// Address returned in sinkhole mode
    pub sinkhole_ipv4: Ipv4Addr,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let interface = InterfaceConfig::default();
        Self {
            interface_name: interface.name,
            address: interface.address,
            prefix_len: interface.prefix_len,
            mtu: interface.mtu,
            dns_servers: interface.dns_servers,
            routes: Vec::new(),
            exclude_self: interface.exclude_self,
            block_mode: BlockMode::default(),
            sinkhole_ipv4: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl TunnelConfig {
    /// Routes installed for the session
    pub fn effective_routes(&self) -> Vec<String> {
        if self.routes.is_empty() {
            host_routes(&self.dns_servers)
        } else {
            self.routes.clone()
        }
    }
}

/// Upstream resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Resolvers tried in order
    pub servers: Vec<SocketAddr>,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Try the next resolver after a failure
    pub retry_secondary: bool,
    /// `SO_MARK` for upstream sockets (Linux)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fwmark: Option<u32>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let upstream = UpstreamSettings::default();
        Self {
            servers: upstream.servers,
            timeout_ms: 2000,
            retry_secondary: upstream.retry_secondary,
            fwmark: None,
        }
    }
}

/// Policy sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// TOML policy store (entries and profiles)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_file: Option<PathBuf>,
    /// Plain-text blocklist file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocklist_file: Option<PathBuf>,
    /// Plain-text allowlist file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowlist_file: Option<PathBuf>,
    /// Inline blocklist patterns
    pub blocklist: Vec<String>,
    /// Inline allowlist patterns
    pub allowlist: Vec<String>,
    /// How often list files are checked for changes
    pub reload_interval_secs: u64,
    /// Consult the offline reputation pattern list
    pub local_reputation: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            store_file: None,
            blocklist_file: None,
            allowlist_file: None,
            blocklist: Vec::new(),
            allowlist: Vec::new(),
            reload_interval_secs: 30,
            local_reputation: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (None = stdout only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Enable JSON format logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}

/// Performance tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Interface read buffer size
    pub read_buffer_size: usize,
    /// Sleep when the interface has no data
    pub idle_backoff_ms: u64,
    /// Consecutive write failures that end the session
    pub max_consecutive_write_failures: u32,
    /// Age at which forgotten in-flight forwards are dropped
    pub in_flight_ttl_secs: u64,
    /// Overall forward deadline (None = derived from upstream settings)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_timeout_ms: Option<u64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 32767,
            idle_backoff_ms: 10,
            max_consecutive_write_failures: 16,
            in_flight_ttl_secs: 5,
            forward_timeout_ms: None,
        }
    }
}
