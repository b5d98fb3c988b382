//! The packet read loop.
//!
//! One thread, one batch at a time: read a batch from the provider, classify
//! every packet in it, then go back for the next. Nothing is queued, so a
//! slow classifier simply slows the reads down.
//!
//! The loop checks the lifecycle's monitoring flag and its own
//! [`CancelToken`] before every read. Neither interrupts a read that is
//! already blocked in the provider; that batch is still classified when it
//! arrives, and the loop exits at the next check.

use crate::logger::{Event, SharedLogger};
use crate::monitor::classifier::ProtocolClassifier;
use crate::monitor::types::{CancelToken, MonitorFlag};
use crate::tunnel::provider::TunnelProvider;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Handle to a running read loop.
pub struct LoopHandle {
    cancel: CancelToken,
    handle: thread::JoinHandle<()>,
}

impl LoopHandle {
    /// Asks the loop to stop before its next read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop thread has exited (cancelled, unmonitored, or the
    /// source went away).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits for it. Blocks for as long as the
    /// in-flight read does.
    pub fn join(self) {
        self.cancel.cancel();
        let _ = self.handle.join();
    }
}

/// Spawns the read loop on its own thread.
///
/// # Arguments
/// * `provider`   - Packet source.
/// * `classifier` - Receives every `(packet, protocol)` pair in batch order.
/// * `monitoring` - Lifecycle flag; the loop only reads while it is `true`.
/// * `logger`     - Shared structured logger.
pub fn spawn_read_loop(
    provider:   Arc<dyn TunnelProvider>,
    classifier: Arc<ProtocolClassifier>,
    monitoring: MonitorFlag,
    logger:     SharedLogger,
) -> LoopHandle {
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let handle = thread::spawn(move || {
        run(provider.as_ref(), &classifier, &monitoring, &token, &logger);
    });

    LoopHandle { cancel, handle }
}

/// Body of the read loop; runs on the caller's thread until one of the
/// exit conditions holds.
pub fn run(
    provider:   &dyn TunnelProvider,
    classifier: &ProtocolClassifier,
    monitoring: &MonitorFlag,
    cancel:     &CancelToken,
    logger:     &SharedLogger,
) {
    loop {
        if !monitoring.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }

        match provider.read_packets() {
            Ok(batch) => {
                for (packet, protocol) in batch.iter() {
                    classifier.classify(packet, protocol);
                }
            }
            Err(e) => {
                logger.log(&Event::Info {
                    message: &format!("Read loop exiting: {}", e),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::logger::Logger;
    use crate::monitor::matcher::DomainMatcher;
    use crate::monitor::types::SessionStats;
    use crate::notify::NotificationEmitter;
    use crate::store::{DetectionStore, SharedDefaults};
    use crate::tunnel::provider::{NetworkSettings, PacketBatch};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Hands out queued batches, then reports the source as gone.
    struct Scripted {
        batches: Mutex<VecDeque<PacketBatch>>,
    }

    impl TunnelProvider for Scripted {
        fn apply_settings(&self, _: &NetworkSettings) -> Result<(), TunnelError> {
            Ok(())
        }

        fn read_packets(&self) -> Result<PacketBatch, TunnelError> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TunnelError::SourceUnavailable("script exhausted".into()))
        }

        fn is_available(&self) -> bool {
            !self.batches.lock().unwrap().is_empty()
        }
    }

    fn dns(name: &str) -> Vec<u8> {
        let mut pkt = vec![0u8; 12];
        for label in name.split('.') {
            pkt.push(label.len() as u8);
            pkt.extend_from_slice(label.as_bytes());
        }
        pkt.push(0);
        pkt
    }

    fn classifier() -> ProtocolClassifier {
        let logger = Logger::silent();
        let store = Arc::new(DetectionStore::new(
            Arc::new(SharedDefaults::in_memory()),
            Arc::new(NotificationEmitter::new(Arc::clone(&logger))),
            Arc::clone(&logger),
        ));
        ProtocolClassifier::new(DomainMatcher::default(), store, logger, SessionStats::new())
    }

    #[test]
    fn test_processes_batches_until_source_gone() {
        let mut b1 = PacketBatch::default();
        b1.push(dns("api.life360.com"), 17);
        b1.push(dns("www.example.com"), 17);
        let mut b2 = PacketBatch::default();
        b2.push(dns("glympse.com"), 17);
        let provider = Scripted { batches: Mutex::new(VecDeque::from(vec![b1, PacketBatch::default(), b2])) };

        let c = classifier();
        let monitoring: MonitorFlag = Arc::new(AtomicBool::new(true));
        run(&provider, &c, &monitoring, &CancelToken::new(), &Logger::silent());

        let log = c.store().snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].service, "Life360");
        assert_eq!(log[1].service, "Glympse");
    }

    #[test]
    fn test_does_not_read_when_not_monitoring() {
        let mut b1 = PacketBatch::default();
        b1.push(dns("api.life360.com"), 17);
        let provider = Scripted { batches: Mutex::new(VecDeque::from(vec![b1])) };

        let c = classifier();
        let monitoring: MonitorFlag = Arc::new(AtomicBool::new(false));
        run(&provider, &c, &monitoring, &CancelToken::new(), &Logger::silent());

        assert!(c.store().is_empty());
        assert!(provider.is_available());
    }

    #[test]
    fn test_cancelled_token_stops_before_read() {
        let provider = Scripted { batches: Mutex::new(VecDeque::from(vec![PacketBatch::default()])) };
        let token = CancelToken::new();
        token.cancel();
        let monitoring: MonitorFlag = Arc::new(AtomicBool::new(true));
        run(&provider, &classifier(), &monitoring, &token, &Logger::silent());
        assert!(provider.is_available());
    }

    #[test]
    fn test_spawned_loop_finishes_when_source_exhausted() {
        let provider: Arc<dyn TunnelProvider> =
            Arc::new(Scripted { batches: Mutex::new(VecDeque::new()) });
        let handle = spawn_read_loop(
            provider,
            Arc::new(classifier()),
            Arc::new(AtomicBool::new(true)),
            Logger::silent(),
        );
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !handle.is_finished() && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(handle.is_finished());
        handle.join();
    }
}
