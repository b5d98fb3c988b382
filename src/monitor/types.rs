use crate::monitor::config::{HEALTH_CHECK_INTERVAL, MAX_RETRIES, RETRY_DELAY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single match of an observed hostname against the tracker table.
///
/// Serialised exactly as it is stored in the shared defaults and handed to
/// the host application: `{timestamp, domain, service}` with the timestamp in
/// fractional seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub timestamp: f64,
    pub domain:    String,
    pub service:   String,
}

impl Detection {
    /// Builds a detection stamped with the current wall-clock time.
    pub fn now(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            timestamp: epoch_seconds(),
            domain:    domain.into(),
            service:   service.into(),
        }
    }
}

/// Current time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Lifecycle state of the tunnel as driven by [`TunnelLifecycle`].
///
/// [`TunnelLifecycle`]: crate::tunnel::lifecycle::TunnelLifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// Not configured; no read loop or health check is running.
    #[default]
    Stopped,
    /// Network settings are being applied.
    Starting,
    /// The last configuration attempt failed; waiting out the retry delay.
    Retrying,
    /// Configured and classifying packets.
    Running,
    /// Configured but paused by the platform; no new batches are requested.
    Sleeping,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Stopped  => "stopped",
            TunnelState::Starting => "starting",
            TunnelState::Retrying => "retrying",
            TunnelState::Running  => "running",
            TunnelState::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

/// Payload returned for the `get_status` control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub is_monitoring: bool,
    pub retry_count:   u32,
    pub timestamp:     f64,
}

/// Lifecycle timings, defaulting to the constants in [`config`] and
/// overridable from the command line.
///
/// [`config`]: crate::monitor::config
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub retry_delay:     Duration,
    pub health_interval: Duration,
    pub max_retries:     u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            retry_delay:     RETRY_DELAY,
            health_interval: HEALTH_CHECK_INTERVAL,
            max_retries:     MAX_RETRIES,
        }
    }
}

/// Shared flag the lifecycle flips to gate the read loop.
pub type MonitorFlag = Arc<AtomicBool>;

/// One-shot cancellation token owned by a single spawned task.
///
/// Unlike the shared [`MonitorFlag`], a token is never reset: a cancelled
/// read loop or health check stays cancelled, and its replacement gets a
/// fresh token.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running counters reported in the session summary.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Packets handed to the classifier.
    pub packets_total:       AtomicU64,
    /// Packets from which a DNS name or SNI hostname was extracted.
    pub hostnames_extracted: AtomicU64,
    /// Extracted hostnames that matched the tracker table.
    pub detections_recorded: AtomicU64,
    /// Times the health check had to restart the read loop.
    pub read_loop_restarts:  AtomicU64,
}

pub type SharedStats = Arc<SessionStats>;

impl SessionStats {
    pub fn new() -> SharedStats {
        Arc::new(Self::default())
    }
}
