pub mod doctor;
pub mod endurance;
pub mod rc;

use serde::Deserialize;
use std::time::Duration;

pub use endurance::{DecisionPort, EnduranceClock, EnduranceMonitor, EnduranceState};
pub use rc::{RcAction, RcMonitor, RcState, RcTimings};

/// `[failsafe]` section of the ground station config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailsafeConfig {
    pub rc_enable: bool,
    /// Throttle PWM below which the RC link counts as lost.
    pub rc_threshold: u16,
    pub rc_sample_ms: u64,
    pub rc_rtl_after_s: u64,
    pub rc_terminate_after_s: u64,

    pub endurance_enable: bool,
    pub endurance_s: u64,
    pub extension_s: u64,
    pub decision_window_s: u64,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            rc_enable: true,
            rc_threshold: 975,
            rc_sample_ms: 500,
            rc_rtl_after_s: 30,
            rc_terminate_after_s: 180,
            endurance_enable: true,
            endurance_s: 1200,
            extension_s: 120,
            decision_window_s: 60,
        }
    }
}

impl FailsafeConfig {
    pub fn rc_timings(&self) -> RcTimings {
        RcTimings {
            threshold: self.rc_threshold,
            sample: Duration::from_millis(self.rc_sample_ms).max(rc::MIN_SAMPLE),
            rtl_after: Duration::from_secs(self.rc_rtl_after_s),
            terminate_after: Duration::from_secs(self.rc_terminate_after_s),
        }
    }

    pub fn endurance_clock(&self) -> EnduranceClock {
        EnduranceClock::new(Duration::from_secs(self.endurance_s), Duration::from_secs(self.extension_s))
    }

    pub fn decision_window(&self) -> Duration {
        Duration::from_secs(self.decision_window_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sample_period_is_floored() {
        let cfg = FailsafeConfig { rc_sample_ms: 0, ..Default::default() };
        assert_eq!(cfg.rc_timings().sample, rc::MIN_SAMPLE);
        assert_eq!(FailsafeConfig::default().rc_timings().sample, Duration::from_millis(500));
    }
}
