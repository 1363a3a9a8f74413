//! In-memory virtual interface
//!
//! Packets written by the engine come out of the [`MemoryPeer`]; packets the
//! peer injects are what the engine reads. Used by tests and dry runs.

use crate::error::PlatformError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use shield_core::engine::{InterfaceConfig, InterfaceEstablisher, VirtualInterface};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long `recv` waits before reporting no data
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Channel-backed virtual interface
#[derive(Debug)]
pub struct MemoryInterface {
    name: String,
    mtu: u16,
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

/// The far side of a [`MemoryInterface`]
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    inbound: Sender<Vec<u8>>,
    outbound: Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl MemoryInterface {
    /// Create an interface and its peer
    pub fn pair(name: impl Into<String>, mtu: u16) -> (Arc<Self>, MemoryPeer) {
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));

        let interface = Arc::new(Self {
            name: name.into(),
            mtu,
            inbound: in_rx,
            outbound: out_tx,
            closed: Arc::clone(&closed),
        });
        let peer = MemoryPeer {
            inbound: in_tx,
            outbound: out_rx,
            closed,
        };
        (interface, peer)
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(PlatformError::Closed)
        } else {
            Ok(())
        }
    }
}

impl VirtualInterface for MemoryInterface {
    fn recv(&self, buf: &mut [u8]) -> shield_core::Result<usize> {
        self.ensure_open()?;
        match self.inbound.recv_timeout(POLL_INTERVAL) {
            Ok(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                Err(PlatformError::CaptureError("peer dropped".into()).into())
            }
        }
    }

    fn send(&self, packet: &[u8]) -> shield_core::Result<()> {
        self.ensure_open()?;
        self.outbound
            .send(packet.to_vec())
            .map_err(|_| PlatformError::InjectionError("peer dropped".into()).into())
    }

    fn close(&self) -> shield_core::Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(name = %self.name, "Closed memory interface");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl MemoryPeer {
    /// Queue a packet for the engine to read
    pub fn inject(&self, packet: impl Into<Vec<u8>>) -> crate::Result<()> {
        self.inbound
            .send(packet.into())
            .map_err(|_| PlatformError::Closed)
    }

    /// Wait for the next packet the engine wrote
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.outbound.recv_timeout(timeout).ok()
    }

    /// Take a written packet if one is queued
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        match self.outbound.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Whether the engine closed the interface
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Establisher handing out prepared memory interfaces
///
/// Each `establish` takes the next prepared interface. With none left, or
/// after [`MemoryEstablisher::fail_with`], establishment fails.
#[derive(Debug, Default)]
pub struct MemoryEstablisher {
    prepared: Mutex<Vec<Arc<MemoryInterface>>>,
    failure: Mutex<Option<String>>,
    established: Mutex<Vec<InterfaceConfig>>,
}

impl MemoryEstablisher {
    /// Establisher with one prepared interface
    pub fn new(interface: Arc<MemoryInterface>) -> Self {
        let establisher = Self::default();
        establisher.prepare(interface);
        establisher
    }

    /// Queue another interface for a later session
    pub fn prepare(&self, interface: Arc<MemoryInterface>) {
        self.prepared.lock().push(interface);
    }

    /// Make every following `establish` fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Configs passed to successful `establish` calls
    pub fn established(&self) -> Vec<InterfaceConfig> {
        self.established.lock().clone()
    }
}

impl InterfaceEstablisher for MemoryEstablisher {
    fn establish(&self, config: &InterfaceConfig) -> shield_core::Result<Arc<dyn VirtualInterface>> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(PlatformError::PermissionDenied(reason).into());
        }

        let mut prepared = self.prepared.lock();
        if prepared.is_empty() {
            return Err(PlatformError::DeviceNotFound(config.name.clone()).into());
        }
        let interface = prepared.remove(0);
        self.established.lock().push(config.clone());

        debug!(name = %config.name, "Established memory interface");
        Ok(interface)
    }
}
