//! Periodic health check for the read loop.
//!
//! A dedicated thread wakes every `interval`, runs the probe supplied by the
//! lifecycle, and goes back to sleep. It sleeps in short ticks so that a
//! cancel is noticed promptly rather than after a full interval. A probe that
//! was already past its cancel check when the token flipped still runs once.

use crate::monitor::types::CancelToken;
use std::thread;
use std::time::Duration;

/// Longest single sleep between cancel checks.
const TICK: Duration = Duration::from_millis(250);

/// Handle to a running health-check thread.
pub struct HealthHandle {
    cancel: CancelToken,
    handle: thread::JoinHandle<()>,
}

impl HealthHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns the health-check thread.
///
/// # Arguments
/// * `interval` - Time between probes; the first probe runs one interval
///                after spawning.
/// * `probe`    - Called on every interval until the handle is cancelled.
pub fn spawn_health_check<F>(interval: Duration, mut probe: F) -> HealthHandle
where
    F: FnMut() + Send + 'static,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let tick = interval.min(TICK).max(Duration::from_millis(1));

    let handle = thread::spawn(move || loop {
        let mut slept = Duration::ZERO;
        while slept < interval {
            if token.is_cancelled() {
                return;
            }
            let step = tick.min(interval - slept);
            thread::sleep(step);
            slept += step;
        }

        if token.is_cancelled() {
            return;
        }
        probe();
    });

    HealthHandle { cancel, handle }
}
