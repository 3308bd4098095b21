//! In-process simulated fixed-wing vehicle behind a [`FrameLink`].
//!
//! Answers the command and mission handshakes the ground station uses and,
//! unless built `silent`, streams telemetry whenever the inbound queue is
//! idle. Used by the `sim` transport and by tests.

use gcs_proto::Location;
use mavlink::common::{
    MavAutopilot, MavCmd, MavMessage, MavMissionResult, MavModeFlag, MavResult, MavState, MavType,
    COMMAND_ACK_DATA, GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, HOME_POSITION_DATA,
    MISSION_ACK_DATA, MISSION_COUNT_DATA, MISSION_REQUEST_DATA, RC_CHANNELS_RAW_DATA, VFR_HUD_DATA,
};
use mavlink::MavHeader;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::bus::gcs_heartbeat;
use crate::error::LinkError;
use crate::link::FrameLink;
use crate::lock;
use crate::mission::MissionItem;
use crate::modes::FlightMode;

const VEHICLE_SYS: u8 = 1;
const VEHICLE_COMP: u8 = 1;
const PEER_GCS_SYS: u8 = 254;
const CAMERA_COMP: u8 = 100;
const POLL: Duration = Duration::from_millis(10);

enum Inbound {
    Frame(MavHeader, MavMessage),
    Malformed,
    Close,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Heartbeat,
    GpsRawInt,
    GlobalPositionInt,
    VfrHud,
    RcChannelsRaw,
    PeerGcs,
}

const STREAMS: [Stream; 6] = [
    Stream::Heartbeat,
    Stream::GpsRawInt,
    Stream::GlobalPositionInt,
    Stream::VfrHud,
    Stream::RcChannelsRaw,
    Stream::PeerGcs,
];

struct Upload {
    items: Vec<Option<MissionItem>>,
}

impl Upload {
    fn next_missing(&self, reverse: bool) -> Option<u16> {
        let missing = |(i, it): (usize, &Option<MissionItem>)| it.is_none().then_some(i as u16);
        if reverse {
            self.items.iter().enumerate().rev().find_map(missing)
        } else {
            self.items.iter().enumerate().find_map(missing)
        }
    }
}

struct Vehicle {
    location: Location,
    home: Location,
    heading: f64,
    groundspeed: f64,
    rc_channel3: u16,
    armed: bool,
    custom_mode: u32,
    terminated: bool,
    hold_position: bool,
    reverse_requests: bool,
    mission_capacity: Option<usize>,
    peer_gcs: bool,
    mission: Vec<MissionItem>,
    upload: Option<Upload>,
    modes: Vec<u32>,
    commands: Vec<MavCmd>,
    stream_cursor: usize,
}

pub struct SimLink {
    tx: Mutex<mpsc::Sender<Inbound>>,
    rx: Mutex<mpsc::Receiver<Inbound>>,
    vehicle: Mutex<Vehicle>,
    streaming: bool,
    closed: AtomicBool,
    gcs_heartbeats: AtomicUsize,
    sequence: AtomicUsize,
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLink {
    /// Streams telemetry from a parked, disarmed aircraft in MANUAL.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Answers requests but streams nothing on its own.
    pub fn silent() -> Self {
        Self::build(false)
    }

    fn build(streaming: bool) -> Self {
        let (tx, rx) = mpsc::channel();
        let home = Location::new(49.2572585, -123.2423108, 70.0);
        Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            vehicle: Mutex::new(Vehicle {
                location: home,
                home,
                heading: 0.0,
                groundspeed: 0.0,
                rc_channel3: 1500,
                armed: false,
                custom_mode: FlightMode::Manual.custom_mode(),
                terminated: false,
                hold_position: false,
                reverse_requests: false,
                mission_capacity: None,
                peer_gcs: false,
                mission: Vec::new(),
                upload: None,
                modes: Vec::new(),
                commands: Vec::new(),
                stream_cursor: 0,
            }),
            streaming,
            closed: AtomicBool::new(false),
            gcs_heartbeats: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn with_location(self, loc: Location) -> Self {
        {
            let mut v = lock(&self.vehicle);
            v.location = loc;
            v.home = loc;
        }
        self
    }

    /// Request upload items last-to-first.
    pub fn with_reverse_requests(self) -> Self {
        lock(&self.vehicle).reverse_requests = true;
        self
    }

    /// Keep at most `n` uploaded items, as an autopilot short on storage would.
    pub fn with_mission_capacity(self, n: usize) -> Self {
        lock(&self.vehicle).mission_capacity = Some(n);
        self
    }

    /// Start armed in `mode`.
    pub fn with_armed_mode(self, mode: FlightMode) -> Self {
        {
            let mut v = lock(&self.vehicle);
            v.armed = true;
            v.custom_mode = mode.custom_mode();
        }
        self
    }

    /// Interleave another ground station's heartbeats with the telemetry.
    pub fn with_peer_gcs(self) -> Self {
        lock(&self.vehicle).peer_gcs = true;
        self
    }

    /// Ignore guided go-to targets.
    pub fn hold_position(&self, hold: bool) {
        lock(&self.vehicle).hold_position = hold;
    }

    pub fn set_rc_channel3(&self, pwm: u16) {
        lock(&self.vehicle).rc_channel3 = pwm;
    }

    pub fn set_location(&self, loc: Location) {
        lock(&self.vehicle).location = loc;
    }

    pub fn set_groundspeed(&self, mps: f64) {
        lock(&self.vehicle).groundspeed = mps;
    }

    pub fn location(&self) -> Location {
        lock(&self.vehicle).location
    }

    pub fn armed(&self) -> bool {
        lock(&self.vehicle).armed
    }

    pub fn mode(&self) -> Option<FlightMode> {
        FlightMode::from_custom_mode(lock(&self.vehicle).custom_mode)
    }

    /// Every mode change commanded so far, oldest first.
    pub fn mode_history(&self) -> Vec<FlightMode> {
        lock(&self.vehicle).modes.iter().filter_map(|m| FlightMode::from_custom_mode(*m)).collect()
    }

    pub fn terminated(&self) -> bool {
        lock(&self.vehicle).terminated
    }

    pub fn mission(&self) -> Vec<MissionItem> {
        lock(&self.vehicle).mission.clone()
    }

    pub fn commands(&self) -> Vec<MavCmd> {
        lock(&self.vehicle).commands.clone()
    }

    pub fn gcs_heartbeats_received(&self) -> usize {
        self.gcs_heartbeats.load(Ordering::Relaxed)
    }

    /// Queue a frame as if the vehicle had sent it.
    pub fn inject(&self, msg: MavMessage) {
        self.push_from(VEHICLE_SYS, VEHICLE_COMP, msg);
    }

    pub fn inject_vehicle_heartbeat(&self) {
        let hb = self.vehicle_heartbeat();
        self.inject(hb);
    }

    pub fn inject_peer_gcs_heartbeat(&self) {
        self.push_from(PEER_GCS_SYS, 0, gcs_heartbeat());
    }

    /// A camera on the vehicle's system announcing itself.
    pub fn inject_camera_heartbeat(&self) {
        let hb = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_CAMERA,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        });
        self.push_from(VEHICLE_SYS, CAMERA_COMP, hb);
    }

    /// Queue a frame from an arbitrary system/component.
    pub fn inject_from(&self, system_id: u8, component_id: u8, msg: MavMessage) {
        self.push_from(system_id, component_id, msg);
    }

    pub fn inject_malformed(&self) {
        let _ = lock(&self.tx).send(Inbound::Malformed);
    }

    /// Make the next read report the link as closed by the peer.
    pub fn drop_link(&self) {
        let _ = lock(&self.tx).send(Inbound::Close);
    }

    fn push_from(&self, system_id: u8, component_id: u8, msg: MavMessage) {
        let header = MavHeader {
            system_id,
            component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) as u8,
        };
        let _ = lock(&self.tx).send(Inbound::Frame(header, msg));
    }

    fn vehicle_heartbeat(&self) -> MavMessage {
        let v = lock(&self.vehicle);
        heartbeat_of(&v)
    }

    fn next_stream_frame(&self) -> Option<(u8, u8, MavMessage)> {
        let mut v = lock(&self.vehicle);
        let stream = STREAMS[v.stream_cursor % STREAMS.len()];
        v.stream_cursor += 1;

        let loc = v.location;
        let msg = match stream {
            Stream::Heartbeat => heartbeat_of(&v),
            Stream::GpsRawInt => MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                lat: (loc.lat * 1.0e7).round() as i32,
                lon: (loc.lng * 1.0e7).round() as i32,
                alt: (loc.alt * 1000.0) as i32,
                fix_type: mavlink::common::GpsFixType::GPS_FIX_TYPE_3D_FIX,
                satellites_visible: 12,
                ..Default::default()
            }),
            Stream::GlobalPositionInt => MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
                lat: (loc.lat * 1.0e7).round() as i32,
                lon: (loc.lng * 1.0e7).round() as i32,
                alt: (loc.alt * 1000.0) as i32,
                relative_alt: ((loc.alt - v.home.alt) * 1000.0) as i32,
                hdg: (v.heading * 100.0) as u16,
                ..Default::default()
            }),
            Stream::VfrHud => MavMessage::VFR_HUD(VFR_HUD_DATA {
                groundspeed: v.groundspeed as f32,
                airspeed: v.groundspeed as f32,
                alt: loc.alt as f32,
                heading: v.heading as i16,
                ..Default::default()
            }),
            Stream::RcChannelsRaw => MavMessage::RC_CHANNELS_RAW(RC_CHANNELS_RAW_DATA {
                chan1_raw: 1500,
                chan2_raw: 1500,
                chan3_raw: v.rc_channel3,
                chan4_raw: 1500,
                rssi: 255,
                ..Default::default()
            }),
            Stream::PeerGcs if v.peer_gcs => return Some((PEER_GCS_SYS, 0, gcs_heartbeat())),
            Stream::PeerGcs => return None,
        };
        Some((VEHICLE_SYS, VEHICLE_COMP, msg))
    }

    fn handle(&self, msg: &MavMessage) {
        let mut replies = Vec::new();
        {
            let mut v = lock(&self.vehicle);
            match msg {
                MavMessage::HEARTBEAT(hb) if hb.mavtype == MavType::MAV_TYPE_GCS => {
                    self.gcs_heartbeats.fetch_add(1, Ordering::Relaxed);
                }
                MavMessage::COMMAND_LONG(cmd) => {
                    v.commands.push(cmd.command);
                    let result = run_command(&mut v, cmd, &mut replies);
                    replies.push(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                        command: cmd.command,
                        result,
                        ..Default::default()
                    }));
                }
                MavMessage::MISSION_CLEAR_ALL(_) => {
                    v.mission.clear();
                    replies.push(mission_ack(MavMissionResult::MAV_MISSION_ACCEPTED));
                }
                MavMessage::MISSION_COUNT(c) => {
                    v.upload = Some(Upload { items: vec![None; c.count as usize] });
                    let next = v.upload.as_ref().and_then(|u| u.next_missing(v.reverse_requests));
                    match next {
                        Some(seq) => replies.push(mission_request(seq)),
                        None => replies.push(mission_ack(MavMissionResult::MAV_MISSION_ACCEPTED)),
                    }
                }
                MavMessage::MISSION_ITEM(_) | MavMessage::MISSION_ITEM_INT(_) => {
                    receive_item(&mut v, msg, &mut replies);
                }
                MavMessage::MISSION_REQUEST_LIST(_) => {
                    replies.push(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
                        count: v.mission.len() as u16,
                        target_system: 255,
                        target_component: 190,
                        ..Default::default()
                    }));
                }
                MavMessage::MISSION_REQUEST(r) => serve_item(&v, r.seq, &mut replies),
                MavMessage::MISSION_REQUEST_INT(r) => serve_item(&v, r.seq, &mut replies),
                _ => {}
            }
        }
        for reply in replies {
            self.inject(reply);
        }
    }
}

fn heartbeat_of(v: &Vehicle) -> MavMessage {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if v.armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: v.custom_mode,
        mavtype: MavType::MAV_TYPE_FIXED_WING,
        autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode,
        system_status: if v.armed { MavState::MAV_STATE_ACTIVE } else { MavState::MAV_STATE_STANDBY },
        mavlink_version: 3,
    })
}

fn run_command(v: &mut Vehicle, cmd: &mavlink::common::COMMAND_LONG_DATA, replies: &mut Vec<MavMessage>) -> MavResult {
    match cmd.command {
        MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
            v.armed = cmd.param1 == 1.0;
            debug!("sim: armed={}", v.armed);
        }
        MavCmd::MAV_CMD_DO_SET_MODE => {
            let mode = cmd.param2 as u32;
            if FlightMode::from_custom_mode(mode).is_none() {
                return MavResult::MAV_RESULT_DENIED;
            }
            v.custom_mode = mode;
            v.modes.push(mode);
            debug!("sim: mode={}", FlightMode::describe(mode));
        }
        MavCmd::MAV_CMD_GET_HOME_POSITION => {
            replies.push(MavMessage::HOME_POSITION(HOME_POSITION_DATA {
                latitude: (v.home.lat * 1.0e7).round() as i32,
                longitude: (v.home.lng * 1.0e7).round() as i32,
                altitude: (v.home.alt * 1000.0) as i32,
                ..Default::default()
            }));
        }
        MavCmd::MAV_CMD_DO_FLIGHTTERMINATION => {
            v.terminated = true;
            v.armed = false;
        }
        MavCmd::MAV_CMD_NAV_TAKEOFF => {
            if !v.armed {
                return MavResult::MAV_RESULT_FAILED;
            }
            v.location.alt = v.home.alt + cmd.param7 as f64;
        }
        MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL => {}
        _ => return MavResult::MAV_RESULT_UNSUPPORTED,
    }
    MavResult::MAV_RESULT_ACCEPTED
}

fn receive_item(v: &mut Vehicle, msg: &MavMessage, replies: &mut Vec<MavMessage>) {
    let Some(item) = MissionItem::from_message(msg) else { return };
    let guided = matches!(msg, MavMessage::MISSION_ITEM(it) if it.current == 2);

    if guided {
        if !v.hold_position {
            v.location = Location::new(item.lat, item.lng, v.home.alt + item.alt);
        }
        return;
    }

    let reverse = v.reverse_requests;
    let Some(upload) = v.upload.as_mut() else { return };
    let Some(slot) = upload.items.get_mut(item.seq as usize) else {
        replies.push(mission_ack(MavMissionResult::MAV_MISSION_INVALID_SEQUENCE));
        return;
    };
    *slot = Some(item);

    if let Some(seq) = upload.next_missing(reverse) {
        replies.push(mission_request(seq));
        return;
    }

    let mut items: Vec<MissionItem> = upload.items.drain(..).flatten().collect();
    if let Some(cap) = v.mission_capacity {
        items.truncate(cap);
    }
    v.mission = items;
    v.upload = None;
    replies.push(mission_ack(MavMissionResult::MAV_MISSION_ACCEPTED));
}

fn serve_item(v: &Vehicle, seq: u16, replies: &mut Vec<MavMessage>) {
    let Some(item) = v.mission.get(seq as usize) else { return };
    let mut item = item.clone();
    // seq 0 always reports the live home position
    if seq == 0 {
        item.lat = v.home.lat;
        item.lng = v.home.lng;
        item.alt = v.home.alt;
    }
    replies.push(item.to_message(255, 190));
}

fn mission_request(seq: u16) -> MavMessage {
    MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA {
        seq,
        target_system: 255,
        target_component: 190,
        ..Default::default()
    })
}

fn mission_ack(result: MavMissionResult) -> MavMessage {
    MavMessage::MISSION_ACK(MISSION_ACK_DATA {
        target_system: 255,
        target_component: 190,
        mavtype: result,
        ..Default::default()
    })
}

impl FrameLink for SimLink {
    fn recv(&self) -> Result<Option<(MavHeader, MavMessage)>, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }

        let next = lock(&self.rx).recv_timeout(POLL);
        match next {
            Ok(Inbound::Frame(header, msg)) => Ok(Some((header, msg))),
            Ok(Inbound::Malformed) => Err(LinkError::Malformed("sim: bad crc".into())),
            Ok(Inbound::Close) => {
                self.closed.store(true, Ordering::Release);
                Err(LinkError::Closed)
            }
            Err(mpsc::RecvTimeoutError::Timeout) if self.streaming => Ok(self.next_stream_frame().map(|(sys, comp, msg)| {
                let header = MavHeader {
                    system_id: sys,
                    component_id: comp,
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed) as u8,
                };
                (header, msg)
            })),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn send(&self, _header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Write("sim link closed".into()));
        }
        self.handle(msg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::COMMAND_LONG_DATA;
    use mavlink::Message;

    fn command(command: MavCmd, param1: f32, param2: f32) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA { command, param1, param2, ..Default::default() })
    }

    fn drain(sim: &SimLink) -> Vec<MavMessage> {
        let mut out = Vec::new();
        while let Ok(Some((_, msg))) = sim.recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn commands_are_acknowledged_and_applied() {
        let sim = SimLink::silent();
        let hdr = MavHeader::default();
        sim.send(&hdr, &command(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, 1.0, 0.0)).unwrap();
        sim.send(&hdr, &command(MavCmd::MAV_CMD_DO_SET_MODE, 1.0, 15.0)).unwrap();

        assert!(sim.armed());
        assert_eq!(sim.mode(), Some(FlightMode::Guided));
        let acks = drain(&sim);
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|m| matches!(m, MavMessage::COMMAND_ACK(a) if a.result == MavResult::MAV_RESULT_ACCEPTED)));
    }

    #[test]
    fn guided_target_moves_the_vehicle_unless_held() {
        let sim = SimLink::silent();
        let target = MissionItem {
            seq: 0,
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            lat: 49.26,
            lng: -123.25,
            alt: 40.0,
            hold: 0.0,
            radius: 0.0,
        };
        let mut msg = target.to_message(1, 1);
        if let MavMessage::MISSION_ITEM(it) = &mut msg {
            it.current = 2;
        }

        sim.hold_position(true);
        sim.send(&MavHeader::default(), &msg).unwrap();
        assert!((sim.location().lat - 49.2572585).abs() < 1e-9);

        sim.hold_position(false);
        sim.send(&MavHeader::default(), &msg).unwrap();
        assert!((sim.location().lat - 49.26).abs() < 1e-5);
    }

    #[test]
    fn streaming_cycles_through_telemetry() {
        let sim = SimLink::new();
        let kinds: Vec<_> = (0..5).filter_map(|_| sim.recv().unwrap()).map(|(_, m)| m.message_id()).collect();
        assert_eq!(kinds, vec![0, 24, 33, 74, 35]);
    }

    #[test]
    fn closed_link_reports_closed() {
        let sim = SimLink::silent();
        sim.drop_link();
        assert!(matches!(sim.recv(), Err(LinkError::Closed)));
        assert!(matches!(sim.recv(), Err(LinkError::Closed)));
        assert!(sim.send(&MavHeader::default(), &gcs_heartbeat()).is_err());
    }
}
