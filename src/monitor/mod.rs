//! Packet classification engine.
//!
//! The read loop pulls batches from the tunnel provider and hands every
//! packet to the [`ProtocolClassifier`], which extracts a DNS query name
//! (UDP) or a TLS SNI hostname (TCP), matches it against the tracker table,
//! and records hits in the detection store. The health check keeps the read
//! loop alive while the tunnel is running.
//!
//! [`ProtocolClassifier`]: classifier::ProtocolClassifier

pub mod classifier;
pub mod config;
pub mod health;
pub mod matcher;
pub mod parsers;
pub mod read_loop;
pub mod types;
