//! In-process detection notifications.
//!
//! The tunnel publishes one [`DetectionEvent`] per recorded detection to
//! every handler registered at that moment. Delivery is synchronous and
//! best-effort: there is no queue, nothing is replayed to late subscribers,
//! and nothing leaves the process.

use crate::logger::{Event, SharedLogger};
use crate::monitor::config::DETECTION_EVENT;
use crate::monitor::types::Detection;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Always [`DETECTION_EVENT`].
    #[serde(skip)]
    pub name:      &'static str,
    pub domain:    String,
    pub service:   String,
    pub timestamp: f64,
}

impl From<&Detection> for DetectionEvent {
    fn from(d: &Detection) -> Self {
        Self {
            name:      DETECTION_EVENT,
            domain:    d.domain.clone(),
            service:   d.service.clone(),
            timestamp: d.timestamp,
        }
    }
}

pub type Handler = Arc<dyn Fn(&DetectionEvent) + Send + Sync>;

/// Identifies a registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct NotificationEmitter {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id:  AtomicU64,
    logger:   SharedLogger,
}

impl NotificationEmitter {
    pub fn new(logger: SharedLogger) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id:  AtomicU64::new(1),
            logger,
        }
    }

    /// Registers `handler` for every future detection.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DetectionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push((id, Arc::new(handler)));
        id
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Publishes `detection` to the current subscribers.
    ///
    /// The handler list is snapshotted first so a handler may subscribe or
    /// unsubscribe without deadlocking. A panicking handler is logged and
    /// skipped; the remaining handlers still run.
    pub fn emit(&self, detection: &Detection) {
        let snapshot: Vec<Handler> = match self.handlers.read() {
            Ok(h) => h.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            Err(e) => e.into_inner().iter().map(|(_, handler)| Arc::clone(handler)).collect(),
        };
        if snapshot.is_empty() {
            return;
        }

        let event = DetectionEvent::from(detection);
        for handler in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                self.logger.log(&Event::Info {
                    message: &format!("{} handler panicked; skipped", event.name),
                });
            }
        }
    }
}
