//! `/dev/net/tun` backed virtual interface
//!
//! The device is opened non-blocking with `IFF_TUN | IFF_NO_PI`, so reads and
//! writes carry bare IP packets. Address, MTU and routes are configured with
//! the `ip` command.
//!
//! Only the configured routes are captured, by default one host route per DNS
//! server. With `exclude_self` they go into a dedicated routing table selected
//! by `not fwmark`, so upstream sockets carrying the mark bypass the tunnel.

use crate::error::{PlatformError, Result};
use parking_lot::RwLock;
use shield_core::engine::{parse_route, InterfaceConfig, InterfaceEstablisher, VirtualInterface};
use std::ffi::c_void;
use std::io;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Firewall mark used when none is configured
pub const DEFAULT_FWMARK: u32 = 0x5348;

/// Routing table holding the captured route
pub const DEFAULT_ROUTE_TABLE: u32 = 0x5348;

const TUN_DEVICE_PATH: &[u8] = b"/dev/net/tun\0";
const IFNAMSIZ: usize = 16;
const TUNSETIFF: usize = 0x4004_54CA;
const IFF_TUN: i16 = 0x0001;
const IFF_NO_PI: i16 = 0x1000;
const O_RDWR: i32 = 0x0002;
const O_NONBLOCK: i32 = 0x0800;
const EAGAIN: i32 = 11;
const EINTR: i32 = 4;

#[repr(C)]
struct IfReq {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: i16,
    ifr_ifru: [u8; 24 - std::mem::size_of::<i16>()],
}

extern "C" {
    fn open(pathname: *const i8, flags: i32, mode: u32) -> i32;
    fn ioctl(fd: i32, request: usize, ...) -> i32;
    fn read(fd: i32, buf: *mut c_void, count: usize) -> isize;
    fn write(fd: i32, buf: *const c_void, count: usize) -> isize;
    fn close(fd: i32) -> i32;
}

/// Policy rule installed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BypassRule {
    fwmark: u32,
    table: u32,
    ipv6: bool,
}

impl BypassRule {
    fn args(self, action: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if self.ipv6 {
            args.push("-6".into());
        }
        args.extend([
            "rule".into(),
            action.into(),
            "not".into(),
            "fwmark".into(),
            self.fwmark.to_string(),
            "table".into(),
            self.table.to_string(),
        ]);
        args
    }
}

/// An open Linux TUN device
#[derive(Debug)]
pub struct LinuxTun {
    name: String,
    mtu: u16,
    fd: RwLock<Option<i32>>,
    rules: Vec<BypassRule>,
}

impl LinuxTun {
    fn open_device(name: &str) -> Result<i32> {
        if name.is_empty() || name.len() >= IFNAMSIZ {
            return Err(PlatformError::DeviceInitFailed(format!(
                "interface name must be 1-{} bytes: {name:?}",
                IFNAMSIZ - 1
            )));
        }

        // SAFETY: path is NUL-terminated and outlives the call
        let fd = unsafe { open(TUN_DEVICE_PATH.as_ptr().cast(), O_RDWR | O_NONBLOCK, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::NotFound => PlatformError::DeviceNotFound(format!("/dev/net/tun: {err}")),
                io::ErrorKind::PermissionDenied => {
                    PlatformError::PermissionDenied(format!("/dev/net/tun: {err}"))
                }
                _ => PlatformError::DeviceInitFailed(format!("open(/dev/net/tun) failed: {err}")),
            });
        }

        let mut ifr = IfReq {
            ifr_name: [0u8; IFNAMSIZ],
            ifr_flags: IFF_TUN | IFF_NO_PI,
            ifr_ifru: [0u8; 24 - std::mem::size_of::<i16>()],
        };
        ifr.ifr_name[..name.len()].copy_from_slice(name.as_bytes());

        // SAFETY: fd is open and ifr is a properly sized ifreq
        let ret = unsafe { ioctl(fd, TUNSETIFF, &mut ifr) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd was returned by open above
            unsafe { close(fd) };
            return Err(match err.kind() {
                io::ErrorKind::PermissionDenied => {
                    PlatformError::PermissionDenied(format!("ioctl(TUNSETIFF): {err}"))
                }
                _ => PlatformError::DeviceInitFailed(format!("ioctl(TUNSETIFF) failed: {err}")),
            });
        }

        Ok(fd)
    }

    fn run_ip(args: &[&str]) -> Result<()> {
        debug!(command = %format!("ip {}", args.join(" ")), "Configuring interface");
        let status = Command::new("ip").args(args).status().map_err(|e| {
            PlatformError::DeviceInitFailed(format!("failed to execute ip {}: {e}", args.join(" ")))
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(PlatformError::DeviceInitFailed(format!(
                "ip {} failed ({status})",
                args.join(" ")
            )))
        }
    }

    fn configure(&mut self, config: &InterfaceConfig, bypass: Option<(u32, u32)>) -> Result<()> {
        let address = format!("{}/{}", config.address, config.prefix_len);
        let mtu = config.mtu.to_string();

        Self::run_ip(&["addr", "replace", &address, "dev", &self.name])?;
        Self::run_ip(&["link", "set", "dev", &self.name, "mtu", &mtu])?;
        Self::run_ip(&["link", "set", "dev", &self.name, "up"])?;

        let table = bypass.map(|(_, table)| table.to_string());
        for route in &config.routes {
            let (addr, _) = parse_route(route)
                .ok_or_else(|| PlatformError::DeviceInitFailed(format!("invalid route {route:?}")))?;
            let mut args = vec!["route", "replace", route.as_str(), "dev", self.name.as_str()];
            if let Some(table) = &table {
                args.extend(["table", table.as_str()]);
            }
            Self::run_ip(&args)?;

            if let Some((fwmark, table)) = bypass {
                let rule = BypassRule {
                    fwmark,
                    table,
                    ipv6: addr.is_ipv6(),
                };
                if !self.rules.contains(&rule) {
                    let rule_args = rule.args("add");
                    Self::run_ip(&rule_args.iter().map(String::as_str).collect::<Vec<_>>())?;
                    self.rules.push(rule);
                }
            }
        }
        Ok(())
    }

    fn with_fd<T>(&self, op: impl FnOnce(i32) -> T) -> Result<T> {
        let guard = self.fd.read();
        let fd = (*guard).ok_or(PlatformError::Closed)?;
        Ok(op(fd))
    }
}

impl VirtualInterface for LinuxTun {
    fn recv(&self, buf: &mut [u8]) -> shield_core::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes; fd stays open under the read lock
        let n = self.with_fd(|fd| unsafe { read(fd, buf.as_mut_ptr().cast::<c_void>(), buf.len()) })?;
        if let Ok(len) = usize::try_from(n) {
            return Ok(len);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(EAGAIN | EINTR) => Ok(0),
            _ => Err(PlatformError::CaptureError(format!("read(tun) failed: {err}")).into()),
        }
    }

    fn send(&self, packet: &[u8]) -> shield_core::Result<()> {
        // SAFETY: packet is valid for packet.len() bytes; fd stays open under the read lock
        let n = self.with_fd(|fd| unsafe { write(fd, packet.as_ptr().cast::<c_void>(), packet.len()) })?;
        match usize::try_from(n) {
            Ok(written) if written == packet.len() => Ok(()),
            Ok(written) => Err(PlatformError::InjectionError(format!(
                "short write: {written} of {} bytes",
                packet.len()
            ))
            .into()),
            Err(_) => {
                let err = io::Error::last_os_error();
                Err(PlatformError::InjectionError(format!("write(tun) failed: {err}")).into())
            }
        }
    }

    fn close(&self) -> shield_core::Result<()> {
        let Some(fd) = self.fd.write().take() else {
            return Ok(());
        };

        for rule in &self.rules {
            let args = rule.args("del");
            if let Err(e) = Self::run_ip(&args.iter().map(String::as_str).collect::<Vec<_>>()) {
                warn!(error = %e, "Failed to remove bypass rule");
            }
        }

        // SAFETY: fd was taken out of the slot, so no other call uses it
        if unsafe { close(fd) } < 0 {
            let err = io::Error::last_os_error();
            return Err(PlatformError::Io(err).into());
        }
        info!(name = %self.name, "Closed TUN device");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl Drop for LinuxTun {
    fn drop(&mut self) {
        let _ = VirtualInterface::close(self);
    }
}

/// Creates [`LinuxTun`] devices
#[derive(Debug, Clone)]
pub struct LinuxTunEstablisher {
    fwmark: u32,
    table: u32,
}

impl Default for LinuxTunEstablisher {
    fn default() -> Self {
        Self {
            fwmark: DEFAULT_FWMARK,
            table: DEFAULT_ROUTE_TABLE,
        }
    }
}

impl LinuxTunEstablisher {
    /// Establisher using the default mark and table
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark carried by sockets that bypass the tunnel
    pub fn with_fwmark(mut self, fwmark: u32) -> Self {
        self.fwmark = fwmark;
        self
    }

    /// Routing table for the captured route
    pub fn with_table(mut self, table: u32) -> Self {
        self.table = table;
        self
    }

    /// Bypass mark in use
    pub fn fwmark(&self) -> u32 {
        self.fwmark
    }
}

impl InterfaceEstablisher for LinuxTunEstablisher {
    fn establish(&self, config: &InterfaceConfig) -> shield_core::Result<Arc<dyn VirtualInterface>> {
        let fd = LinuxTun::open_device(&config.name)?;
        let bypass = config.exclude_self.then_some((self.fwmark, self.table));

        let mut tun = LinuxTun {
            name: config.name.clone(),
            mtu: config.mtu,
            fd: RwLock::new(Some(fd)),
            rules: Vec::new(),
        };
        // Dropping `tun` on failure closes the descriptor and removes the
        // rules installed so far
        tun.configure(config, bypass)?;

        info!(
            name = %config.name,
            address = %config.address,
            mtu = config.mtu,
            routes = ?config.routes,
            bypass = ?bypass,
            "TUN device established"
        );
        Ok(Arc::new(tun))
    }
}
