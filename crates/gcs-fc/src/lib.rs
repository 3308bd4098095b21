pub mod bus;
pub mod error;
pub mod link;
pub mod mission;
pub mod modes;
pub mod sim;
pub mod state;
pub mod vehicle;

use serde::Deserialize;
use std::time::Duration;

pub use bus::{Frame, FrameKind, TelemetryBus, Waiter};
pub use error::{ConnectionError, LinkError, MissionTransferError, TelemetryError};
pub use link::{FrameLink, LinkWriter, MavLink, Transport};
pub use mission::{AirdropTarget, MissionItem, MissionPlan};
pub use modes::FlightMode;
pub use vehicle::{TakeoffParams, Vehicle};

/// `[link]` section of the ground station config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// `tcp`, `udp`, `serial` or `sim`. When set together with `address`,
    /// the server connects at startup.
    pub transport: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub baud: Option<u32>,

    /// MAVLink ids we use (ground station side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// Vehicle heartbeat wait during connect.
    pub heartbeat_timeout_ms: u64,

    /// Upper bound for derived telemetry getters.
    pub telemetry_timeout_ms: u64,

    /// Requested rate of the streamed telemetry frames.
    pub stream_hz: f32,

    /// Ground station heartbeat rate.
    pub keepalive_hz: f32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: None,
            address: None,
            port: None,
            baud: None,
            sys_id: 255,
            comp_id: 190,
            heartbeat_timeout_ms: 5000,
            telemetry_timeout_ms: 5000,
            stream_hz: 10.0,
            keepalive_hz: 1.0,
        }
    }
}

impl LinkConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.keepalive_hz.max(1.0))
    }
}

pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
