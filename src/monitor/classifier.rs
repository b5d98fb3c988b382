//! Per-packet dispatch: parser → matcher → store.
//!
//! Dispatch is by IP protocol number alone. Every UDP payload is offered to
//! the DNS parser and every TCP payload to the SNI parser; ports are never
//! consulted. Parsers reject what they cannot read, so the cost of a
//! non-DNS/non-TLS packet is one failed parse.

use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{IPPROTO_TCP, IPPROTO_UDP};
use crate::monitor::matcher::DomainMatcher;
use crate::monitor::parsers::{parse_dns_query_name, parse_tls_sni};
use crate::monitor::types::{Detection, SharedStats};
use crate::store::DetectionStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct ProtocolClassifier {
    matcher: DomainMatcher,
    store:   Arc<DetectionStore>,
    logger:  SharedLogger,
    stats:   SharedStats,
}

impl ProtocolClassifier {
    pub fn new(
        matcher: DomainMatcher,
        store:   Arc<DetectionStore>,
        logger:  SharedLogger,
        stats:   SharedStats,
    ) -> Self {
        Self { matcher, store, logger, stats }
    }

    /// Classifies one packet, recording a detection if its hostname matches.
    ///
    /// Returns the recorded detection, if any.
    pub fn classify(&self, packet: &[u8], ip_protocol: u8) -> Option<Detection> {
        self.stats.packets_total.fetch_add(1, Ordering::Relaxed);

        let hostname = match ip_protocol {
            IPPROTO_UDP => {
                let domain = parse_dns_query_name(packet)?;
                self.logger.log(&Event::Dns { domain: &domain });
                domain
            }
            IPPROTO_TCP => {
                let sni = parse_tls_sni(packet)?;
                self.logger.log(&Event::TlsSni { sni: &sni });
                sni
            }
            _ => return None,
        };
        self.stats.hostnames_extracted.fetch_add(1, Ordering::Relaxed);

        let service = self.matcher.match_domain(&hostname)?;
        self.logger.log(&Event::Detection { domain: &hostname, service });
        self.stats.detections_recorded.fetch_add(1, Ordering::Relaxed);

        let detection = Detection::now(hostname, service);
        self.store.record(detection.clone());
        Some(detection)
    }

    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::monitor::types::SessionStats;
    use crate::notify::NotificationEmitter;
    use crate::store::SharedDefaults;

    fn classifier() -> ProtocolClassifier {
        let logger = Logger::silent();
        let emitter = Arc::new(NotificationEmitter::new(Arc::clone(&logger)));
        let store = Arc::new(DetectionStore::new(
            Arc::new(SharedDefaults::in_memory()),
            emitter,
            Arc::clone(&logger),
        ));
        ProtocolClassifier::new(DomainMatcher::default(), store, logger, SessionStats::new())
    }

    fn dns_packet(name: &str) -> Vec<u8> {
        let mut pkt = vec![0u8; 12];
        for label in name.split('.') {
            pkt.push(label.len() as u8);
            pkt.extend_from_slice(label.as_bytes());
        }
        pkt.push(0);
        pkt
    }

    fn tls_packet(host: &str) -> Vec<u8> {
        let mut pkt = vec![0x16, 0x03, 0x01, 0x00, 0x40, 0x01];
        pkt.extend_from_slice(&[0x00, 0x00, 0x00, host.len() as u8]);
        pkt.extend_from_slice(host.as_bytes());
        pkt
    }

    #[test]
    fn test_udp_dns_match_is_recorded() {
        let c = classifier();
        let det = c.classify(&dns_packet("api.life360.com"), IPPROTO_UDP).unwrap();
        assert_eq!(det.service, "Life360");
        assert_eq!(det.domain, "api.life360.com");
        assert_eq!(c.store().snapshot().len(), 1);
    }

    #[test]
    fn test_tcp_sni_match_is_recorded() {
        let c = classifier();
        let det = c.classify(&tls_packet("p01-fmip.icloud.com"), IPPROTO_TCP).unwrap();
        assert_eq!(det.service, "Apple Find My iPhone");
        assert_eq!(c.store().snapshot()[0].domain, "p01-fmip.icloud.com");
    }

    #[test]
    fn test_protocol_number_selects_parser() {
        let c = classifier();
        // A DNS payload offered as TCP fails the 0x16 record check.
        assert!(c.classify(&dns_packet("api.life360.com"), IPPROTO_TCP).is_none());
        // ICMP and friends are ignored entirely.
        assert!(c.classify(&dns_packet("api.life360.com"), 1).is_none());
        assert!(c.store().is_empty());
    }

    #[test]
    fn test_unmatched_hostname_not_recorded() {
        let c = classifier();
        assert!(c.classify(&dns_packet("www.example.com"), IPPROTO_UDP).is_none());
        assert!(c.store().is_empty());
        assert_eq!(c.stats.hostnames_extracted.load(Ordering::Relaxed), 1);
        assert_eq!(c.stats.packets_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_malformed_payload_is_silently_skipped() {
        let c = classifier();
        assert!(c.classify(&[0u8; 4], IPPROTO_UDP).is_none());
        assert!(c.classify(&[0x16, 0x03], IPPROTO_TCP).is_none());
        assert_eq!(c.stats.hostnames_extracted.load(Ordering::Relaxed), 0);
    }
}
