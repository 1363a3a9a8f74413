//! Linux TUN device support

mod tun;

pub use tun::{LinuxTun, LinuxTunEstablisher, DEFAULT_FWMARK, DEFAULT_ROUTE_TABLE};
