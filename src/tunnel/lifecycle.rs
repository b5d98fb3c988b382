//! Tunnel lifecycle state machine.
//!
//! ```text
//!            start()                 ok
//!  Stopped ──────────▶ Starting ───────────▶ Running ◀──── wake() ────┐
//!     ▲                 │    ▲                 │  │                   │
//!     │   exhausted     │    │ retry delay     │  └──── sleep() ──▶ Sleeping
//!     ├─────────────────┤    │                 │                      │
//!     │                 ▼    │                 │                      │
//!     │               Retrying                 │                      │
//!     └────────────────────────── stop() ──────┴──────────────────────┘
//! ```
//!
//! The lifecycle owns the state, the retry counter and the monitoring flag.
//! Everything else reads them through [`TunnelLifecycle::status`].

use crate::error::TunnelError;
use crate::logger::{Event, SharedLogger};
use crate::monitor::classifier::ProtocolClassifier;
use crate::monitor::health::{spawn_health_check, HealthHandle};
use crate::monitor::read_loop::{spawn_read_loop, LoopHandle};
use crate::monitor::types::{epoch_seconds, MonitorFlag, SharedStats, Timings, TunnelState, TunnelStatus};
use crate::tunnel::provider::{NetworkSettings, TunnelProvider};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep while waiting out a retry delay.
const RETRY_TICK: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Tasks {
    read_loop: Option<LoopHandle>,
    health:    Option<HealthHandle>,
}

struct Shared {
    provider:    Arc<dyn TunnelProvider>,
    classifier:  Arc<ProtocolClassifier>,
    settings:    NetworkSettings,
    timings:     Timings,
    logger:      SharedLogger,
    stats:       SharedStats,
    state:       Mutex<TunnelState>,
    retry_count: AtomicU32,
    monitoring:  MonitorFlag,
    /// Lock order: `tasks` before `state`. Never take `tasks` while holding `state`.
    tasks:       Mutex<Tasks>,
}

pub struct TunnelLifecycle {
    shared: Arc<Shared>,
}

impl TunnelLifecycle {
    pub fn new(
        provider:   Arc<dyn TunnelProvider>,
        classifier: Arc<ProtocolClassifier>,
        settings:   NetworkSettings,
        timings:    Timings,
        logger:     SharedLogger,
        stats:      SharedStats,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                classifier,
                settings,
                timings,
                logger,
                stats,
                state:       Mutex::new(TunnelState::Stopped),
                retry_count: AtomicU32::new(0),
                monitoring:  Arc::new(AtomicBool::new(false)),
                tasks:       Mutex::new(Tasks::default()),
            }),
        }
    }

    /// Applies the network settings and starts monitoring.
    ///
    /// Failed attempts are retried after `timings.retry_delay` until the retry
    /// counter reaches `timings.max_retries`; the failure after that is
    /// returned as [`TunnelError::ConfigurationExhausted`] and the tunnel is
    /// left `Stopped`. Blocks the caller for the whole retry sequence.
    ///
    /// The counter is only cleared by a successful configuration or by
    /// `stop()`, so a `start()` straight after exhaustion gets one attempt.
    ///
    /// Calling `start()` on a tunnel that is not `Stopped` does nothing.
    pub fn start(&self) -> Result<(), TunnelError> {
        {
            let mut state = self.shared.lock_state();
            if *state != TunnelState::Stopped {
                return Ok(());
            }
            self.shared.transition(&mut state, TunnelState::Starting);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.shared.provider.apply_settings(&self.shared.settings) {
                Ok(()) => return self.shared.on_configured(),
                Err(e) => e,
            };
            if self.shared.on_attempt_failed(&err)? {
                self.shared.wait_for_retry()?;
                continue;
            }
            return Err(if err.is_retryable() {
                TunnelError::ConfigurationExhausted { attempts, last: err.to_string() }
            } else {
                err
            });
        }
    }

    /// Stops monitoring and tears down the read loop and health check.
    /// Safe to call in any state, any number of times.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            if *state != TunnelState::Stopped {
                self.shared.transition(&mut state, TunnelState::Stopped);
            }
            self.shared.monitoring.store(false, Ordering::SeqCst);
            self.shared.retry_count.store(0, Ordering::SeqCst);
        }

        let mut tasks = self.shared.lock_tasks();
        if let Some(health) = tasks.health.take() {
            health.cancel();
        }
        if let Some(read_loop) = tasks.read_loop.take() {
            read_loop.cancel();
        }
    }

    /// Pauses monitoring while the device sleeps. Only valid while `Running`.
    ///
    /// A read already blocked in the provider is not interrupted; the batch it
    /// returns is still classified, and the loop then exits.
    pub fn sleep(&self) {
        {
            let mut state = self.shared.lock_state();
            if *state != TunnelState::Running {
                return;
            }
            self.shared.transition(&mut state, TunnelState::Sleeping);
            self.shared.monitoring.store(false, Ordering::SeqCst);
        }

        let tasks = self.shared.lock_tasks();
        if let Some(health) = &tasks.health {
            health.cancel();
        }
        if let Some(read_loop) = &tasks.read_loop {
            read_loop.cancel();
        }
    }

    /// Resumes monitoring after [`sleep`](Self::sleep). Only valid while
    /// `Sleeping`.
    pub fn wake(&self) {
        {
            let mut state = self.shared.lock_state();
            if *state != TunnelState::Sleeping {
                return;
            }
            self.shared.transition(&mut state, TunnelState::Running);
            self.shared.monitoring.store(true, Ordering::SeqCst);
        }
        Shared::restart_health_check(&self.shared);
        Shared::restart_read_loop(&self.shared);
    }

    pub fn state(&self) -> TunnelState {
        *self.shared.lock_state()
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::SeqCst)
    }

    /// Snapshot reported to the host application.
    pub fn status(&self) -> TunnelStatus {
        TunnelStatus {
            is_monitoring: self.is_monitoring(),
            retry_count:   self.retry_count(),
            timestamp:     epoch_seconds(),
        }
    }

    /// Whether a read loop thread is currently alive.
    pub fn read_loop_alive(&self) -> bool {
        self.shared
            .lock_tasks()
            .read_loop
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Runs one health probe immediately, outside the timer.
    ///
    /// Returns `true` if the read loop was restarted.
    pub fn check_health(&self) -> bool {
        Shared::probe(&self.shared)
    }
}

impl Drop for TunnelLifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, TunnelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, state: &mut TunnelState, to: TunnelState) {
        let from = *state;
        *state = to;
        self.logger.log(&Event::StateChange {
            from: &from.to_string(),
            to:   &to.to_string(),
        });
    }

    /// Success path of `start()`.
    fn on_configured(self: &Arc<Self>) -> Result<(), TunnelError> {
        {
            let mut state = self.lock_state();
            if *state != TunnelState::Starting {
                // stop() ran while the settings were being applied.
                return Err(TunnelError::Cancelled);
            }
            self.retry_count.store(0, Ordering::SeqCst);
            self.monitoring.store(true, Ordering::SeqCst);
            self.transition(&mut state, TunnelState::Running);
        }
        Self::restart_read_loop(self);
        Self::restart_health_check(self);
        Ok(())
    }

    /// Counts a failed configuration attempt and decides what follows.
    ///
    /// Returns `Ok(true)` with the state moved to `Retrying` when another
    /// attempt is due, `Ok(false)` after a terminal failure (state `Stopped`,
    /// counter left at its final value), and `Cancelled` if `stop()` ran while
    /// the attempt was in flight. The counter only changes under the state
    /// lock while `Starting`, so it cannot outlive a concurrent `stop()`.
    fn on_attempt_failed(&self, err: &TunnelError) -> Result<bool, TunnelError> {
        let mut state = self.lock_state();
        if *state != TunnelState::Starting {
            return Err(TunnelError::Cancelled);
        }

        let retries = self.retry_count.load(Ordering::SeqCst);
        if err.is_retryable() && retries < self.timings.max_retries {
            self.retry_count.store(retries + 1, Ordering::SeqCst);
            self.logger.log(&Event::ConfigureFailed {
                error:       &err.to_string(),
                retry_count: retries + 1,
            });
            self.transition(&mut state, TunnelState::Retrying);
            return Ok(true);
        }

        self.logger.log(&Event::ConfigureFailed {
            error:       &err.to_string(),
            retry_count: retries,
        });
        self.transition(&mut state, TunnelState::Stopped);
        self.monitoring.store(false, Ordering::SeqCst);
        Ok(false)
    }

    /// Waits out the retry delay in `Retrying` and moves back to `Starting`.
    /// Fails with `Cancelled` if `stop()` intervenes.
    fn wait_for_retry(&self) -> Result<(), TunnelError> {
        let deadline = Instant::now() + self.timings.retry_delay;
        loop {
            if *self.lock_state() != TunnelState::Retrying {
                return Err(TunnelError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(RETRY_TICK.min(deadline - now));
        }

        let mut state = self.lock_state();
        if *state != TunnelState::Retrying {
            return Err(TunnelError::Cancelled);
        }
        self.transition(&mut state, TunnelState::Starting);
        Ok(())
    }

    /// Replaces the read loop, cancelling any previous one.
    ///
    /// The state is checked under the tasks lock, so a `stop()` or `sleep()`
    /// that has already left `Running` either prevents the spawn or cancels
    /// the new handle when it takes the tasks lock next. Returns whether a
    /// loop was spawned.
    fn restart_read_loop(this: &Arc<Self>) -> bool {
        let mut tasks = this.lock_tasks();
        if *this.lock_state() != TunnelState::Running {
            return false;
        }
        let handle = spawn_read_loop(
            Arc::clone(&this.provider),
            Arc::clone(&this.classifier),
            Arc::clone(&this.monitoring),
            Arc::clone(&this.logger),
        );
        if let Some(old) = tasks.read_loop.replace(handle) {
            old.cancel();
        }
        true
    }

    /// Replaces the health-check timer, cancelling any previous one. Same
    /// state check as [`restart_read_loop`](Self::restart_read_loop).
    fn restart_health_check(this: &Arc<Self>) -> bool {
        let mut tasks = this.lock_tasks();
        if *this.lock_state() != TunnelState::Running {
            return false;
        }
        let shared = Arc::clone(this);
        let handle = spawn_health_check(this.timings.health_interval, move || {
            Self::probe(&shared);
        });
        if let Some(old) = tasks.health.replace(handle) {
            old.cancel();
        }
        true
    }

    /// Restarts the read loop if the packet source looks gone or the loop has
    /// exited. Never changes the tunnel state.
    fn probe(this: &Arc<Self>) -> bool {
        if !this.monitoring.load(Ordering::SeqCst) || *this.lock_state() != TunnelState::Running {
            return false;
        }

        let loop_finished = this
            .lock_tasks()
            .read_loop
            .as_ref()
            .map_or(true, |h| h.is_finished());
        let source_gone = !this.provider.is_available();
        if !loop_finished && !source_gone {
            return false;
        }

        if !Self::restart_read_loop(this) {
            return false;
        }
        let reason = if source_gone { "packet source unavailable" } else { "read loop exited" };
        this.logger.log(&Event::ReadLoopRestarted { reason });
        this.stats.read_loop_restarts.fetch_add(1, Ordering::Relaxed);
        true
    }
}
