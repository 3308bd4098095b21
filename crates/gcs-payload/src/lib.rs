pub mod automation;
pub mod device;
pub mod winch;

use serde::Deserialize;
use std::time::Duration;

pub use automation::{AutomationExit, WinchAutomation};
pub use device::{DeviceError, SerialConnector, SerialWinch, WinchConnector, WinchDevice};
pub use winch::{WinchCell, WinchState};

/// `[winch]` section of the ground station config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WinchConfig {
    pub enable: bool,

    /// Fixed device. When unset the candidates are probed in order.
    pub serial_dev: Option<String>,
    pub candidate_devs: Option<Vec<String>>,
    pub baud: u32,

    /// Horizontal distance from the airdrop target that starts the drop.
    pub allowed_radius_m: f64,

    /// Position check cadence once the target is known.
    pub poll_ms: u64,

    /// Delay between failed device opens, and between target checks.
    pub retry_ms: u64,
}

impl Default for WinchConfig {
    fn default() -> Self {
        Self {
            enable: false,
            serial_dev: None,
            candidate_devs: None,
            baud: 9600,
            allowed_radius_m: 4.0,
            poll_ms: 100,
            retry_ms: 1000,
        }
    }
}

impl WinchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    /// Devices to probe, the configured one alone if set.
    pub fn devices(&self) -> Vec<String> {
        match (&self.serial_dev, &self.candidate_devs) {
            (Some(dev), _) => vec![dev.clone()],
            (None, Some(list)) => list.clone(),
            (None, None) => device::default_candidate_devs(),
        }
    }
}
