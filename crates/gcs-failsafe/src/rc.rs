//! RC-disconnect escalation: RTL after a sustained loss, flight termination
//! if it lasts longer still.

use gcs_fc::{FlightMode, TelemetryError, Vehicle};
use gcs_payload::WinchCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Floor for the sample period; `interval` rejects zero.
pub const MIN_SAMPLE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcState {
    Connected,
    SignalLost,
    RtlTriggered,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcAction {
    None,
    Rtl,
    Loiter,
    Terminate,
}

#[derive(Debug, Clone, Copy)]
pub struct RcTimings {
    pub threshold: u16,
    pub sample: Duration,
    pub rtl_after: Duration,
    pub terminate_after: Duration,
}

pub struct RcMonitor {
    timings: RcTimings,
    state: RcState,
    lost_since: Option<Instant>,
}

impl RcMonitor {
    pub fn new(timings: RcTimings) -> Self {
        Self { timings, state: RcState::Connected, lost_since: None }
    }

    pub fn state(&self) -> RcState {
        self.state
    }

    /// Feed one channel sample taken at `now`.
    pub fn sample(&mut self, pwm: u16, now: Instant) -> RcAction {
        if self.state == RcState::Terminated {
            return RcAction::None;
        }

        if pwm >= self.timings.threshold {
            self.lost_since = None;
            let was = std::mem::replace(&mut self.state, RcState::Connected);
            return if was == RcState::RtlTriggered { RcAction::Loiter } else { RcAction::None };
        }

        let since = *self.lost_since.get_or_insert(now);
        let lost_for = now.saturating_duration_since(since);

        if lost_for >= self.timings.terminate_after {
            self.state = RcState::Terminated;
            RcAction::Terminate
        } else if lost_for >= self.timings.rtl_after && self.state != RcState::RtlTriggered {
            self.state = RcState::RtlTriggered;
            RcAction::Rtl
        } else {
            if self.state == RcState::Connected {
                self.state = RcState::SignalLost;
            }
            RcAction::None
        }
    }

    /// How long the signal has been lost, if it is.
    pub fn lost_for(&self, now: Instant) -> Option<Duration> {
        self.lost_since.map(|t| now.saturating_duration_since(t))
    }

    /// Sample the throttle channel until termination, link loss or the
    /// returning-home flag.
    pub async fn run(mut self, vehicle: Arc<Vehicle>, winch: WinchCell, returning_home: Arc<AtomicBool>) -> RcState {
        let mut ticker = tokio::time::interval(self.timings.sample.max(MIN_SAMPLE));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("rc failsafe: monitoring (threshold {})", self.timings.threshold);

        loop {
            ticker.tick().await;
            if returning_home.load(Ordering::Acquire) {
                info!("rc failsafe: returning home, monitor stopped");
                return self.state;
            }

            let pwm = match vehicle.rc_channel3().await {
                Ok(v) => v,
                Err(TelemetryError::LinkLost) => {
                    warn!("rc failsafe: link lost, monitor stopped");
                    return self.state;
                }
                Err(e) => {
                    warn!("rc failsafe: {}", e);
                    continue;
                }
            };

            let prev = self.state;
            let now = Instant::now();
            let action = self.sample(pwm, now);
            if prev == RcState::Connected && self.state == RcState::SignalLost {
                warn!("rc failsafe: RC connection lost (ch3={})", pwm);
            } else if self.state == RcState::SignalLost {
                if let Some(d) = self.lost_for(now) {
                    warn!("rc failsafe: disconnected for {:.1}s", d.as_secs_f32());
                }
            }

            let sent = match action {
                RcAction::None => Ok(()),
                RcAction::Rtl => {
                    if winch.reel_if_mid_operation() {
                        warn!("rc failsafe: winch mid-operation, emergency reel requested");
                    }
                    warn!("rc failsafe: aircraft returning home to land");
                    vehicle.set_mode(FlightMode::Rtl)
                }
                RcAction::Loiter => {
                    info!("rc failsafe: RC connection restored, loitering");
                    vehicle.set_mode(FlightMode::Loiter)
                }
                RcAction::Terminate => {
                    error!("rc failsafe: FLIGHT TERMINATED");
                    vehicle.terminate()
                }
            };
            if let Err(e) = sent {
                error!("rc failsafe: command failed: {}", e);
            }
            if self.state == RcState::Terminated {
                return self.state;
            }
        }
    }
}
