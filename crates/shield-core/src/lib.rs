//! # Shield Core
//!
//! Platform-independent core of the Shield parental-control DNS filter.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Packet parsing** - Borrowed IPv4/IPv6/UDP/TCP views and a DNS query codec
//! - **Policy store** - Allow/block lists, category rules and profiles behind
//!   copy-on-write snapshots
//! - **Domain classification** - Fixed-precedence evaluation of a domain against
//!   a policy snapshot
//! - **Schedules** - Allowed-hours evaluation for the active profile
//! - **Tunnel engine** - The lifecycle state machine that reads the virtual
//!   interface, filters DNS and forwards allowed queries upstream
//! - **Configuration** - TOML configuration with age-group presets
//!
//! ## Example
//!
//! ```rust,no_run
//! use shield_core::{classify, ListType, PolicyStore};
//!
//! let store = PolicyStore::new();
//! store.add_entry("*.example.com", ListType::Block)?;
//!
//! let result = classify("api.example.com", &store.snapshot());
//! assert!(result.is_blocked);
//! # Ok::<(), shield_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod policy;
pub mod schedule;

// Re-exports for convenience
pub use classifier::{classify, Category, ClassificationResult, ThreatLevel, VerdictSource};
pub use config::Config;
pub use engine::{BlockMode, EngineSettings, EngineState, EventSink, Stats, TunnelEngine};
pub use error::{Error, Result};
pub use packet::{PacketView, ParseError};
pub use policy::{ListType, PolicySnapshot, PolicyStore, Profile};
pub use schedule::{is_allowed_now, TimeOfDay};
