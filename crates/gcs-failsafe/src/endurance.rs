//! Flight-time budget. When it runs out the operator gets one decision
//! window to extend; otherwise the aircraft is sent home once any drop in
//! progress has finished.

use gcs_fc::{FlightMode, Vehicle};
use gcs_payload::{WinchCell, WinchState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, info, warn};

const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnduranceState {
    Flying,
    WarningWindow,
    Extended,
    ReturningHome,
}

/// Elapsed-time budget with a movable threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnduranceClock {
    threshold: Duration,
    extension: Duration,
}

impl EnduranceClock {
    pub fn new(threshold: Duration, extension: Duration) -> Self {
        Self { threshold, extension }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_due(&self, elapsed: Duration) -> bool {
        elapsed >= self.threshold
    }

    pub fn extend(&mut self) {
        self.threshold += self.extension;
    }
}

/// Where the operator's extend/decline answer comes in. Holds at most one
/// pending question.
#[derive(Debug, Clone, Default)]
pub struct DecisionPort(Arc<Mutex<Option<oneshot::Sender<bool>>>>);

impl DecisionPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Answer the pending question. False when nothing was pending.
    pub fn answer(&self, extend: bool) -> bool {
        let pending = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        match pending {
            Some(tx) => tx.send(extend).is_ok(),
            None => false,
        }
    }

    fn ask(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    fn withdraw(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Wait up to `window` for an answer; silence or a dropped port declines.
    pub async fn decide(&self, window: Duration) -> bool {
        let rx = self.ask();
        let extend = matches!(tokio::time::timeout(window, rx).await, Ok(Ok(true)));
        self.withdraw();
        extend
    }
}

pub struct EnduranceMonitor {
    clock: EnduranceClock,
    window: Duration,
    port: DecisionPort,
    state: EnduranceState,
    tick: Duration,
}

impl EnduranceMonitor {
    pub fn new(clock: EnduranceClock, window: Duration, port: DecisionPort) -> Self {
        Self { clock, window, port, state: EnduranceState::Flying, tick: DEFAULT_TICK }
    }

    /// Clock check cadence (default 1s).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn state(&self) -> EnduranceState {
        self.state
    }

    pub async fn run(mut self, vehicle: Arc<Vehicle>, winch: WinchCell, returning_home: Arc<AtomicBool>) -> EnduranceState {
        let started = Instant::now();
        info!("endurance: budget {}s", self.clock.threshold().as_secs());

        loop {
            tokio::time::sleep(self.tick).await;
            if !vehicle.is_alive() {
                warn!("endurance: link lost, monitor stopped");
                return self.state;
            }

            let elapsed = started.elapsed();
            if !self.clock.is_due(elapsed) {
                if self.state == EnduranceState::Extended {
                    self.state = EnduranceState::Flying;
                }
                continue;
            }

            self.state = EnduranceState::WarningWindow;
            warn!(
                "endurance: {} min flight time reached; extend by {}s? (answer within {}s)",
                elapsed.as_secs() / 60,
                self.clock.extension.as_secs(),
                self.window.as_secs()
            );

            if self.port.decide(self.window).await {
                self.clock.extend();
                self.state = EnduranceState::Extended;
                info!("endurance: extended to {}s", self.clock.threshold().as_secs());
                continue;
            }

            warn!("endurance: no extension, returning home");
            returning_home.store(true, Ordering::Release);
            self.state = EnduranceState::ReturningHome;

            while matches!(winch.get(), WinchState::InProgress | WinchState::EmergencyReel) {
                if !vehicle.is_alive() {
                    return self.state;
                }
                info!("endurance: waiting for winch ({}) before RTL", winch.get());
                tokio::time::sleep(self.tick).await;
            }

            if let Err(e) = vehicle.set_mode(FlightMode::Rtl) {
                error!("endurance: RTL command failed: {}", e);
            }
            info!("endurance: returning to land");
            return self.state;
        }
    }
}
