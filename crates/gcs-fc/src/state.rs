use gcs_proto::{HeartbeatInfo, TelemetrySnapshot};
use mavlink::common::{MavAutopilot, MavMessage, MavModeFlag, MavType, HEARTBEAT_DATA};

use crate::modes::FlightMode;

/// True for heartbeats from an autopilot. Ground stations, cameras,
/// companion computers and other peripherals announce
/// `MAV_AUTOPILOT_INVALID`.
pub fn is_vehicle_heartbeat(hb: &HEARTBEAT_DATA) -> bool {
    hb.mavtype != MavType::MAV_TYPE_GCS && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID
}

pub fn is_armed(hb: &HEARTBEAT_DATA) -> bool {
    hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED)
}

pub fn heartbeat_info(hb: &HEARTBEAT_DATA) -> HeartbeatInfo {
    HeartbeatInfo {
        mav_type: format!("{:?}", hb.mavtype),
        autopilot: format!("{:?}", hb.autopilot),
        base_mode: hb.base_mode.bits(),
        custom_mode: hb.custom_mode,
        system_status: format!("{:?}", hb.system_status),
        armed: is_armed(hb),
        mode: FlightMode::describe(hb.custom_mode),
    }
}

/// Fold one vehicle frame into the cached snapshot. Frames that carry none
/// of the cached fields leave it untouched.
pub fn apply(snap: &mut TelemetrySnapshot, msg: &MavMessage) {
    match msg {
        MavMessage::HEARTBEAT(hb) => {
            snap.armed = Some(is_armed(hb));
            snap.mode = Some(FlightMode::describe(hb.custom_mode));
            snap.last_heartbeat_unix_ms =
                Some((time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64);
        }
        MavMessage::GPS_RAW_INT(gps) => {
            snap.lat = Some(gps.lat as f64 * 1.0e-7);
            snap.lng = Some(gps.lon as f64 * 1.0e-7);
        }
        MavMessage::GLOBAL_POSITION_INT(pos) => {
            // alt is mm above MSL
            snap.alt = Some(pos.alt as f64 / 1000.0);
            if pos.hdg != u16::MAX {
                snap.heading = Some(pos.hdg as f64 / 100.0);
            }
        }
        MavMessage::VFR_HUD(hud) => {
            snap.groundspeed = Some(hud.groundspeed as f64);
        }
        MavMessage::RC_CHANNELS_RAW(rc) => {
            snap.rc_channel3 = Some(rc.chan3_raw);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, RC_CHANNELS_RAW_DATA};

    #[test]
    fn fields_stay_unset_until_their_frame_arrives() {
        let mut snap = TelemetrySnapshot::default();
        apply(
            &mut snap,
            &MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA { lat: 492_572_585, lon: -1_232_423_108, ..Default::default() }),
        );
        assert!((snap.lat.unwrap() - 49.2572585).abs() < 1e-9);
        assert!(snap.alt.is_none());
        assert!(snap.armed.is_none());
        assert!(snap.location().is_none());

        apply(
            &mut snap,
            &MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA { alt: 77_000, hdg: 9_050, ..Default::default() }),
        );
        assert_eq!(snap.alt, Some(77.0));
        assert_eq!(snap.heading, Some(90.5));
        assert!(snap.location().is_some());
    }

    #[test]
    fn unknown_heading_is_not_cached() {
        let mut snap = TelemetrySnapshot::default();
        apply(
            &mut snap,
            &MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA { hdg: u16::MAX, ..Default::default() }),
        );
        assert!(snap.heading.is_none());
    }

    #[test]
    fn heartbeat_sets_armed_and_mode() {
        let mut snap = TelemetrySnapshot::default();
        let hb = HEARTBEAT_DATA {
            custom_mode: FlightMode::Auto.custom_mode(),
            mavtype: MavType::MAV_TYPE_FIXED_WING,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED | MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            ..Default::default()
        };
        apply(&mut snap, &MavMessage::HEARTBEAT(hb.clone()));
        assert_eq!(snap.armed, Some(true));
        assert_eq!(snap.mode.as_deref(), Some("AUTO"));
        assert!(snap.last_heartbeat_unix_ms.is_some());
        assert!(is_vehicle_heartbeat(&hb));
    }

    #[test]
    fn peripherals_are_not_vehicle_heartbeats() {
        let camera = HEARTBEAT_DATA {
            mavtype: MavType::MAV_TYPE_CAMERA,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            ..Default::default()
        };
        let gcs = HEARTBEAT_DATA {
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            ..Default::default()
        };
        assert!(!is_vehicle_heartbeat(&camera));
        assert!(!is_vehicle_heartbeat(&gcs));
    }

    #[test]
    fn rc_channel_three_is_cached() {
        let mut snap = TelemetrySnapshot::default();
        apply(&mut snap, &MavMessage::RC_CHANNELS_RAW(RC_CHANNELS_RAW_DATA { chan3_raw: 960, ..Default::default() }));
        assert_eq!(snap.rc_channel3, Some(960));
    }
}
