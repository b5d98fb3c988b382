//! # infiloc-tunnel
//!
//! Passive on-device classifier for location-tracking traffic.
//!
//! Runs inside a packet tunnel, reads the packets the platform hands it, and
//! pulls out two plaintext fields without decrypting anything: DNS query
//! names and TLS ClientHello SNI hostnames. Hostnames that match the tracker
//! table are kept in a bounded, persisted history the host application can
//! query and clear over a small control protocol.
//!
//! ## Modules
//!
//! - [`monitor`]: parsers, matcher, classifier, read loop, health check
//! - [`tunnel`]: lifecycle state machine and the packet-source capability
//! - [`store`]: shared defaults and the bounded detection log
//! - [`notify`]: in-process detection events
//! - [`control`]: host-app request/response channel
//! - [`logger`]: structured plain-text / NDJSON logging

pub mod control;
pub mod error;
pub mod logger;
pub mod monitor;
pub mod notify;
pub mod store;
pub mod tunnel;

pub use control::ControlChannel;
pub use error::{StoreError, TunnelError};
pub use monitor::classifier::ProtocolClassifier;
pub use monitor::matcher::{match_domain, DomainMatcher};
pub use monitor::parsers::{parse_dns_query_name, parse_tls_sni};
pub use monitor::types::{Detection, Timings, TunnelState, TunnelStatus};
pub use notify::NotificationEmitter;
pub use store::{DetectionStore, SharedDefaults};
pub use tunnel::TunnelLifecycle;
