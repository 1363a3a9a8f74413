//! Shield Platform Layer
//!
//! Virtual interface implementations for the filtering engine.
//!
//! ## Supported Platforms
//!
//! - **Linux**: `/dev/net/tun`
//! - **Any**: in-memory channel device for tests and dry runs

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub use error::{PlatformError, Result};

pub mod memory;
pub use memory::{MemoryEstablisher, MemoryInterface, MemoryPeer};

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{LinuxTun, LinuxTunEstablisher};
