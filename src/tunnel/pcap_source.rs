//! libpcap-backed packet source.
//!
//! Stands in for the platform tunnel runtime when running on a desktop or
//! replaying a saved capture: "applying network settings" opens the capture,
//! and each batch is up to [`BATCH_SIZE`] frames sliced down to their
//! transport payload and IP protocol number.

use crate::error::TunnelError;
use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{BATCH_SIZE, IPPROTO_TCP, IPPROTO_UDP};
use crate::tunnel::provider::{NetworkSettings, PacketBatch, TunnelProvider};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap::{Activated, Capture, Linktype};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Read timeout for live captures, so an idle interface still returns
/// (empty) batches and the read loop gets to check its cancel token.
const LIVE_TIMEOUT_MS: i32 = 200;

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Live capture on the named interface, or libpcap's default device.
    Interface(Option<String>),
    /// Offline replay of a capture file.
    File(PathBuf),
}

struct OpenCapture {
    capture:  Capture<dyn Activated>,
    ethernet: bool,
}

pub struct PcapProvider {
    source:    CaptureSource,
    capture:   Mutex<Option<OpenCapture>>,
    available: AtomicBool,
    logger:    SharedLogger,
}

impl PcapProvider {
    pub fn new(source: CaptureSource, logger: SharedLogger) -> Self {
        Self {
            source,
            capture:   Mutex::new(None),
            available: AtomicBool::new(false),
            logger,
        }
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenCapture>> {
        self.capture.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens the configured capture.
    fn open(&self) -> Result<Capture<dyn Activated>, String> {
        match &self.source {
            CaptureSource::File(path) => {
                let cap = Capture::from_file(path)
                    .map_err(|e| format!("Failed to open PCAP file '{}': {}", path.display(), e))?;
                Ok(cap.into())
            }
            CaptureSource::Interface(Some(name)) => {
                let cap = Capture::from_device(name.as_str())
                    .map_err(|e| format!("Cannot open interface '{}': {}", name, e))?
                    .promisc(true)
                    .timeout(LIVE_TIMEOUT_MS)
                    .open()
                    .map_err(|e| format!("Cannot start capture on '{}': {}", name, e))?;
                Ok(cap.into())
            }
            CaptureSource::Interface(None) => {
                let dev = pcap::Device::lookup()
                    .map_err(|e| format!("pcap device lookup failed: {}", e))?
                    .ok_or_else(|| "No capture device found".to_string())?;
                let cap = Capture::from_device(dev)
                    .map_err(|e| format!("Cannot open default device: {}", e))?
                    .promisc(true)
                    .timeout(LIVE_TIMEOUT_MS)
                    .open()
                    .map_err(|e| format!("Cannot start capture: {}", e))?;
                Ok(cap.into())
            }
        }
    }
}

impl TunnelProvider for PcapProvider {
    fn apply_settings(&self, settings: &NetworkSettings) -> Result<(), TunnelError> {
        let capture = self.open().map_err(TunnelError::Configuration)?;
        let ethernet = capture.get_datalink() == Linktype::ETHERNET;
        *self.lock() = Some(OpenCapture { capture, ethernet });
        self.available.store(true, Ordering::SeqCst);

        let dns: Vec<String> = settings.dns_servers.iter().map(|ip| ip.to_string()).collect();
        self.logger.log(&Event::Info {
            message: &format!(
                "Capture open ({:?}); tunnel {}/{} via {}, dns [{}], default route: {}",
                self.source,
                settings.ipv4_address,
                settings.ipv4_mask,
                settings.remote_address,
                dns.join(", "),
                settings.routes_default(),
            ),
        });
        Ok(())
    }

    fn read_packets(&self) -> Result<PacketBatch, TunnelError> {
        let mut guard = self.lock();
        let Some(open) = guard.as_mut() else {
            return Err(TunnelError::SourceUnavailable("capture not open".into()));
        };

        let mut batch = PacketBatch::default();
        let mut closed: Option<String> = None;
        while batch.len() < BATCH_SIZE {
            match open.capture.next_packet() {
                Ok(pkt) => {
                    if let Some((payload, protocol)) = slice_frame(pkt.data, open.ethernet) {
                        batch.push(payload.to_vec(), protocol);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => break,
                Err(pcap::Error::NoMorePackets) => {
                    closed = Some("end of capture".to_string());
                    break;
                }
                Err(e) => {
                    closed = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(reason) = closed {
            *guard = None;
            self.available.store(false, Ordering::SeqCst);
            if batch.is_empty() {
                return Err(TunnelError::SourceUnavailable(reason));
            }
        }
        Ok(batch)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Slices a captured frame down to `(transport payload, IP protocol number)`.
///
/// Frames that are not IP, or that etherparse cannot slice, yield `None`.
pub fn slice_frame(frame: &[u8], ethernet: bool) -> Option<(&[u8], u8)> {
    let sliced = if ethernet {
        SlicedPacket::from_ethernet(frame).ok()?
    } else {
        SlicedPacket::from_ip(frame).ok()?
    };

    let protocol = match &sliced.transport {
        Some(TransportSlice::Udp(_)) => IPPROTO_UDP,
        Some(TransportSlice::Tcp(_)) => IPPROTO_TCP,
        _ => match &sliced.ip {
            Some(InternetSlice::Ipv4(h, _)) => h.protocol(),
            Some(InternetSlice::Ipv6(h, _)) => h.next_header(),
            None => return None,
        },
    };
    Some((sliced.payload, protocol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use etherparse::PacketBuilder;

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 8, 0, 2], [8, 8, 8, 8], 64)
            .udp(53000, 53);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn tcp_ip_packet(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 8, 0, 2], [1, 1, 1, 1], 64)
            .tcp(50000, 443, 1, 65535);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn test_slice_udp_ethernet_frame() {
        let frame = udp_frame(b"dns-bytes");
        let (payload, proto) = slice_frame(&frame, true).unwrap();
        assert_eq!(proto, IPPROTO_UDP);
        assert_eq!(payload, b"dns-bytes");
    }

    #[test]
    fn test_slice_raw_ip_tcp_packet() {
        let pkt = tcp_ip_packet(&[0x16, 0x03, 0x01]);
        let (payload, proto) = slice_frame(&pkt, false).unwrap();
        assert_eq!(proto, IPPROTO_TCP);
        assert_eq!(payload, &[0x16, 0x03, 0x01]);
    }

    #[test]
    fn test_slice_garbage_is_none() {
        assert!(slice_frame(&[0u8; 3], true).is_none());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let provider = PcapProvider::new(
            CaptureSource::File(PathBuf::from("/nonexistent/capture.pcap")),
            Logger::silent(),
        );
        let err = provider.apply_settings(&NetworkSettings::default()).unwrap_err();
        assert!(matches!(err, TunnelError::Configuration(_)));
        assert!(!provider.is_available());
    }

    #[test]
    fn test_read_before_open_is_unavailable() {
        let provider = PcapProvider::new(CaptureSource::Interface(None), Logger::silent());
        assert!(matches!(provider.read_packets(), Err(TunnelError::SourceUnavailable(_))));
    }
}
