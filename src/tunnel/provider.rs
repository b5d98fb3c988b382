//! The capability surface of the platform tunnel runtime.
//!
//! The core never forwards, rewrites or injects packets. It asks the runtime
//! for three things only: apply network settings, hand over the next batch
//! of packets, and say whether the packet source is still there.

use crate::error::TunnelError;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Settings applied when the tunnel starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSettings {
    /// Placeholder remote endpoint; the tunnel terminates on-device.
    pub remote_address:  String,
    pub dns_servers:     Vec<Ipv4Addr>,
    pub ipv4_address:    Ipv4Addr,
    pub ipv4_mask:       Ipv4Addr,
    /// `(destination, mask)` pairs routed into the tunnel.
    pub included_routes: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            remote_address:  "127.0.0.1".to_string(),
            dns_servers:     vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            ipv4_address:    Ipv4Addr::new(10, 8, 0, 2),
            ipv4_mask:       Ipv4Addr::new(255, 255, 255, 0),
            included_routes: vec![(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)],
        }
    }
}

impl NetworkSettings {
    /// Whether the routes cover all IPv4 traffic.
    pub fn routes_default(&self) -> bool {
        self.included_routes
            .iter()
            .any(|(dst, mask)| dst.is_unspecified() && mask.is_unspecified())
    }
}

/// One read from the packet source: packets and their IP protocol numbers,
/// index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketBatch {
    pub packets:   Vec<Vec<u8>>,
    pub protocols: Vec<u8>,
}

impl PacketBatch {
    pub fn push(&mut self, packet: Vec<u8>, protocol: u8) {
        self.packets.push(packet);
        self.protocols.push(protocol);
    }

    pub fn len(&self) -> usize {
        self.packets.len().min(self.protocols.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(packet, protocol)` pairs; a length mismatch truncates to the shorter side.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u8)> {
        self.packets.iter().map(Vec::as_slice).zip(self.protocols.iter().copied())
    }
}

/// Platform tunnel runtime as seen by the lifecycle and the read loop.
pub trait TunnelProvider: Send + Sync {
    /// Applies network settings. Called once per start attempt.
    fn apply_settings(&self, settings: &NetworkSettings) -> Result<(), TunnelError>;

    /// Blocks until the next batch is available.
    ///
    /// An empty batch is allowed (e.g. a read timeout). `SourceUnavailable`
    /// ends the current read loop.
    fn read_packets(&self) -> Result<PacketBatch, TunnelError>;

    /// Whether the packet source is still attached.
    fn is_available(&self) -> bool;
}
