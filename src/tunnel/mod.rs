//! Tunnel lifecycle and the packet-source capability it drives.

pub mod lifecycle;
#[cfg(feature = "pcap-source")]
pub mod pcap_source;
pub mod provider;

pub use lifecycle::TunnelLifecycle;
pub use provider::{NetworkSettings, PacketBatch, TunnelProvider};
