//! Session lifecycle: the monotonically increasing session generation, the
//! cancellation token, the session clock, and the hard-cutoff watchdog.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use talkloop_core::config::SessionTiming;
use talkloop_core::session::EndReason;

/// Monotonic clock for one session, anchored at session start.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
    timing: SessionTiming,
}

impl SessionClock {
    pub fn start(timing: SessionTiming) -> Self {
        Self {
            started: Instant::now(),
            timing,
        }
    }

    pub fn elapsed_sec(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    /// Time remaining until the hard cutoff should fire.
    pub fn until_hard_cutoff(&self) -> Duration {
        Duration::from_secs(self.timing.hard_cutoff_sec()).saturating_sub(self.started.elapsed())
    }
}

/// Cloneable handle onto one session's stop machinery.
///
/// Every mutation checks the generation first, so controls held by deferred
/// callbacks from an ended or superseded session become no-ops.
#[derive(Clone)]
pub struct LifecycleControl {
    generation: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    stop_reason: Arc<Mutex<Option<EndReason>>>,
}

impl LifecycleControl {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Request the session to stop. The first recorded reason wins;
    /// requests from stale generations are ignored.
    pub fn request_stop(&self, reason: EndReason) {
        if !self.is_current() {
            debug!(
                generation = self.generation,
                reason = reason.as_str(),
                "Ignoring stop request for stale session"
            );
            return;
        }
        {
            let mut slot = self.stop_reason.lock().unwrap();
            if slot.is_none() {
                info!(reason = reason.as_str(), "Session stop requested");
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn stop_reason(&self) -> Option<EndReason> {
        *self.stop_reason.lock().unwrap()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Owns one session's generation, clock, and watchdog.
pub struct Lifecycle {
    control: LifecycleControl,
    clock: SessionClock,
}

impl Lifecycle {
    /// Claim the next generation and start the session clock.
    pub fn begin(timing: SessionTiming, current: Arc<AtomicU64>) -> Self {
        let generation = current.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Session lifecycle began");
        Self {
            control: LifecycleControl {
                generation,
                current,
                cancel: CancellationToken::new(),
                stop_reason: Arc::new(Mutex::new(None)),
            },
            clock: SessionClock::start(timing),
        }
    }

    pub fn generation(&self) -> u64 {
        self.control.generation
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }

    pub fn control(&self) -> LifecycleControl {
        self.control.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.control.cancel_token()
    }

    pub fn request_stop(&self, reason: EndReason) {
        self.control.request_stop(reason);
    }

    pub fn stop_reason(&self) -> Option<EndReason> {
        self.control.stop_reason()
    }

    /// Spawn the watchdog that force-stops the session shortly before the
    /// time target, guaranteeing the session cannot overrun.
    pub fn spawn_hard_cutoff(&self) -> JoinHandle<()> {
        let control = self.control.clone();
        let delay = self.clock.until_hard_cutoff();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            control.request_stop(EndReason::TargetReached);
        })
    }
}
