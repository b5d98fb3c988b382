//! Bounded, persisted history of detections.
//!
//! The log lives in the [`SharedDefaults`] under [`DETECTIONS_KEY`] as a JSON
//! array of `{timestamp, domain, service}`. Every mutation is a full
//! read-modify-write of that key, done under one mutex so the tunnel's read
//! loop and host-side control requests (`clear_detections`) cannot lose each
//! other's updates. Both sides must go through the same `Arc<DetectionStore>`.

use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{DETECTION_CAPACITY, DETECTIONS_KEY};
use crate::monitor::types::Detection;
use crate::notify::NotificationEmitter;
use crate::store::defaults::SharedDefaults;
use std::sync::{Arc, Mutex};

pub struct DetectionStore {
    defaults: Arc<SharedDefaults>,
    emitter:  Arc<NotificationEmitter>,
    logger:   SharedLogger,
    capacity: usize,
    write:    Mutex<()>,
}

impl DetectionStore {
    pub fn new(
        defaults: Arc<SharedDefaults>,
        emitter:  Arc<NotificationEmitter>,
        logger:   SharedLogger,
    ) -> Self {
        Self::with_capacity(defaults, emitter, logger, DETECTION_CAPACITY)
    }

    pub fn with_capacity(
        defaults: Arc<SharedDefaults>,
        emitter:  Arc<NotificationEmitter>,
        logger:   SharedLogger,
        capacity: usize,
    ) -> Self {
        Self { defaults, emitter, logger, capacity, write: Mutex::new(()) }
    }

    /// Appends `detection`, evicting the oldest entries beyond capacity, then
    /// publishes it to the notification subscribers.
    ///
    /// A failed write is logged and otherwise ignored; the notification is
    /// still emitted.
    pub fn record(&self, detection: Detection) {
        {
            let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
            let mut log = self.load();
            log.push(detection.clone());
            if log.len() > self.capacity {
                let excess = log.len() - self.capacity;
                log.drain(..excess);
            }
            self.save(&log);
        }

        self.emitter.emit(&detection);
    }

    /// Empties the persisted log.
    pub fn clear(&self) {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        self.save(&[]);
    }

    /// Read-only copy of the log, oldest first.
    pub fn snapshot(&self) -> Vec<Detection> {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reads the stored log. A missing key is an empty log; an undecodable
    /// one is logged and treated as empty so the next write repairs it.
    fn load(&self) -> Vec<Detection> {
        match self.defaults.get::<Vec<Detection>>(DETECTIONS_KEY) {
            Ok(log) => log.unwrap_or_default(),
            Err(e) => {
                self.logger.log(&Event::StoreError {
                    message: &format!("discarding unreadable {}: {}", DETECTIONS_KEY, e),
                });
                Vec::new()
            }
        }
    }

    fn save(&self, log: &[Detection]) {
        if let Err(e) = self.defaults.set(DETECTIONS_KEY, &log) {
            self.logger.log(&Event::StoreError {
                message: &format!("failed to write {}: {}", DETECTIONS_KEY, e),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> (DetectionStore, Arc<NotificationEmitter>, Arc<SharedDefaults>) {
        let logger = Logger::silent();
        let defaults = Arc::new(SharedDefaults::in_memory());
        let emitter = Arc::new(NotificationEmitter::new(Arc::clone(&logger)));
        let store = DetectionStore::new(Arc::clone(&defaults), Arc::clone(&emitter), logger);
        (store, emitter, defaults)
    }

    fn numbered(i: usize) -> Detection {
        Detection { timestamp: i as f64, domain: format!("host{}.life360.com", i), service: "Life360".into() }
    }

    #[test]
    fn test_keeps_last_hundred_in_order() {
        let (store, _, _) = store();
        for i in 0..105 {
            store.record(numbered(i));
        }

        let log = store.snapshot();
        assert_eq!(log.len(), 100);
        let expected: Vec<Detection> = (5..105).map(numbered).collect();
        assert_eq!(log, expected);
    }

    #[test]
    fn test_record_emits_notification() {
        let (store, emitter, _) = store();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        emitter.subscribe(move |ev| {
            assert_eq!(ev.service, "Life360");
            c.fetch_add(1, Ordering::SeqCst);
        });

        store.record(numbered(1));
        store.record(numbered(2));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_empties_log() {
        let (store, _, defaults) = store();
        store.record(numbered(1));
        assert_eq!(store.len(), 1);

        store.clear();

        assert!(store.is_empty());
        assert_eq!(defaults.get::<Vec<Detection>>(DETECTIONS_KEY).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_corrupt_key_is_replaced_on_next_record() {
        let (store, _, defaults) = store();
        defaults.set(DETECTIONS_KEY, &"garbage").unwrap();
        assert!(store.snapshot().is_empty());

        store.record(numbered(7));

        assert_eq!(store.snapshot(), vec![numbered(7)]);
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let (store, _, _) = store();
        let store = Arc::new(store);
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..20 {
                        store.record(numbered(t * 100 + i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.len(), 80);
    }

    #[test]
    fn test_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.json");
        {
            let defaults = Arc::new(SharedDefaults::open(&path).unwrap());
            let emitter = Arc::new(NotificationEmitter::new(Logger::silent()));
            let store = DetectionStore::new(defaults, emitter, Logger::silent());
            store.record(numbered(3));
        }
        let defaults = Arc::new(SharedDefaults::open(&path).unwrap());
        let emitter = Arc::new(NotificationEmitter::new(Logger::silent()));
        let store = DetectionStore::new(defaults, emitter, Logger::silent());
        assert_eq!(store.snapshot(), vec![numbered(3)]);
    }
}
