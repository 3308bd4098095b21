use gcs_proto::{HeartbeatInfo, Location, TelemetrySnapshot};
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, COMMAND_LONG_DATA, MISSION_ITEM_DATA,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bus::{Frame, FrameKind, TelemetryBus};
use crate::error::{LinkError, TelemetryError};
use crate::link::LinkWriter;
use crate::modes::FlightMode;
use crate::state;

/// Message ids whose stream rate is configured at connect.
pub const STREAMED_MESSAGES: [(u32, &str); 5] = [
    (24, "GPS_RAW_INT"),
    (0, "HEARTBEAT"),
    (74, "VFR_HUD"),
    (33, "GLOBAL_POSITION_INT"),
    (35, "RC_CHANNELS_RAW"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TakeoffParams {
    pub pitch: f32,
    pub yaw: f32,
    pub lat: f32,
    pub lng: f32,
    pub alt: f32,
}

/// A connected vehicle: the telemetry bus plus the write half of the link.
/// Commands are fire-and-forget; acknowledgements, when wanted, come from the
/// bus.
pub struct Vehicle {
    bus: Arc<TelemetryBus>,
    writer: Arc<LinkWriter>,
    target_sys: u8,
    target_comp: u8,
    telemetry_timeout: Duration,
}

impl Vehicle {
    pub fn new(bus: Arc<TelemetryBus>, writer: Arc<LinkWriter>, target_sys: u8, target_comp: u8, telemetry_timeout: Duration) -> Self {
        bus.set_target(target_sys, target_comp);
        Self { bus, writer, target_sys, target_comp, telemetry_timeout }
    }

    pub fn bus(&self) -> &Arc<TelemetryBus> {
        &self.bus
    }

    pub fn target(&self) -> (u8, u8) {
        (self.target_sys, self.target_comp)
    }

    pub fn is_alive(&self) -> bool {
        self.bus.is_alive()
    }

    pub fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        self.writer.send(msg)
    }

    pub fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<(), LinkError> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        self.send(&MavMessage::COMMAND_LONG(cmd))
    }

    pub fn set_mode(&self, mode: FlightMode) -> Result<(), LinkError> {
        info!("fc: mode -> {}", mode);
        // param1 = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [1.0, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn arm(&self) -> Result<(), LinkError> {
        info!("fc: arm");
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn disarm(&self) -> Result<(), LinkError> {
        info!("fc: disarm");
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7])
    }

    /// Irreversible: the autopilot cuts propulsion.
    pub fn terminate(&self) -> Result<(), LinkError> {
        info!("fc: FLIGHT TERMINATION");
        self.command_long(MavCmd::MAV_CMD_DO_FLIGHTTERMINATION, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn takeoff(&self, p: TakeoffParams) -> Result<(), LinkError> {
        info!("fc: takeoff to {}m", p.alt);
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [p.pitch, 0.0, 0.0, p.yaw, p.lat, p.lng, p.alt])
    }

    /// `hz <= 0` restores the autopilot default rate.
    pub fn set_message_interval(&self, message_id: u32, hz: f32) -> Result<(), LinkError> {
        let interval_us = if hz > 0.0 { 1_000_000.0 / hz } else { -1.0 };
        self.command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [message_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    pub fn request_streams(&self, hz: f32) -> Result<(), LinkError> {
        for (id, _) in STREAMED_MESSAGES {
            self.set_message_interval(id, hz)?;
        }
        Ok(())
    }

    /// Guided-mode go-to: a mission item flagged as the current guided target.
    pub fn fly_to(&self, target: Location) -> Result<(), LinkError> {
        let item = MISSION_ITEM_DATA {
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: target.lat as f32,
            y: target.lng as f32,
            z: target.alt as f32,
            seq: 0,
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            target_system: self.target_sys,
            target_component: self.target_comp,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
            current: 2,
            autocontinue: 0,
            ..Default::default()
        };
        self.send(&MavMessage::MISSION_ITEM(item))
    }

    pub async fn home_position(&self) -> Result<Location, TelemetryError> {
        let reply = self.bus.waiter(FrameKind::HomePosition);
        self.command_long(MavCmd::MAV_CMD_GET_HOME_POSITION, [0.0; 7])?;
        match self.expect(reply.recv(Some(self.telemetry_timeout)).await, FrameKind::HomePosition)? {
            MavMessage::HOME_POSITION(h) => Ok(Location::new(
                h.latitude as f64 * 1.0e-7,
                h.longitude as f64 * 1.0e-7,
                h.altitude as f64 / 1000.0,
            )),
            _ => Err(TelemetryError::Timeout(FrameKind::HomePosition)),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.bus.snapshot()
    }

    /// Waits for fresh raw-GPS and fused-position frames before composing.
    pub async fn location(&self) -> Result<Location, TelemetryError> {
        self.fresh(FrameKind::GpsRawInt).await?;
        self.fresh(FrameKind::GlobalPositionInt).await?;
        self.snapshot().location().ok_or(TelemetryError::Timeout(FrameKind::GlobalPositionInt))
    }

    /// Latest raw-GPS fix, for tight position polling.
    pub async fn gps_location(&self, timeout: Duration) -> Result<Location, TelemetryError> {
        let frame = self.bus.wait(FrameKind::GpsRawInt, Some(timeout)).await;
        self.expect(frame, FrameKind::GpsRawInt)?;
        let snap = self.snapshot();
        match (snap.lat, snap.lng) {
            (Some(lat), Some(lng)) => Ok(Location::new(lat, lng, snap.alt.unwrap_or_default())),
            _ => Err(TelemetryError::Timeout(FrameKind::GpsRawInt)),
        }
    }

    pub async fn heading(&self) -> Result<f64, TelemetryError> {
        self.fresh(FrameKind::GlobalPositionInt).await?;
        self.snapshot().heading.ok_or(TelemetryError::Timeout(FrameKind::GlobalPositionInt))
    }

    pub async fn groundspeed(&self) -> Result<f64, TelemetryError> {
        self.fresh(FrameKind::VfrHud).await?;
        self.snapshot().groundspeed.ok_or(TelemetryError::Timeout(FrameKind::VfrHud))
    }

    pub async fn rc_channel3(&self) -> Result<u16, TelemetryError> {
        self.fresh(FrameKind::RcChannelsRaw).await?;
        self.snapshot().rc_channel3.ok_or(TelemetryError::Timeout(FrameKind::RcChannelsRaw))
    }

    /// Next heartbeat from the vehicle itself.
    pub async fn heartbeat(&self) -> Result<HeartbeatInfo, TelemetryError> {
        match self.fresh(FrameKind::Heartbeat).await? {
            MavMessage::HEARTBEAT(hb) => Ok(state::heartbeat_info(&hb)),
            _ => Err(TelemetryError::Timeout(FrameKind::Heartbeat)),
        }
    }

    /// Whatever the link decodes next, tracked kind or not.
    pub async fn next_frame(&self) -> Result<Frame, TelemetryError> {
        match self.bus.next_frame(Some(self.telemetry_timeout)).await {
            Some(f) => Ok(f),
            None if !self.bus.is_alive() => Err(TelemetryError::LinkLost),
            None => Err(TelemetryError::Silent(self.telemetry_timeout)),
        }
    }

    /// Flight mode from the most recent vehicle heartbeat, without waiting.
    pub fn flight_mode(&self) -> Option<FlightMode> {
        self.bus.last_heartbeat().and_then(|hb| FlightMode::from_custom_mode(hb.custom_mode))
    }

    async fn fresh(&self, kind: FrameKind) -> Result<MavMessage, TelemetryError> {
        let frame = self.bus.wait(kind, Some(self.telemetry_timeout)).await;
        self.expect(frame, kind)
    }

    fn expect(&self, frame: Option<Frame>, kind: FrameKind) -> Result<MavMessage, TelemetryError> {
        match frame {
            Some(f) => Ok(f.message),
            None if !self.bus.is_alive() => Err(TelemetryError::LinkLost),
            None => Err(TelemetryError::Timeout(kind)),
        }
    }
}
