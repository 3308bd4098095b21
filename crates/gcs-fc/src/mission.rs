//! Mission upload/download over the telemetry bus.
//!
//! Upload: MISSION_CLEAR_ALL, MISSION_COUNT(n), then one MISSION_ITEM per
//! MISSION_REQUEST(seq) in whatever order the vehicle asks, then a
//! MISSION_REQUEST_LIST whose MISSION_COUNT must equal `n`.
//!
//! Download: MISSION_REQUEST_LIST, MISSION_COUNT(n), then MISSION_REQUEST(seq)
//! / MISSION_ITEM for each `seq` in `0..n`, closed by a MISSION_ACK.

use gcs_proto::{Location, MissionDownload, Waypoint};
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA,
    MISSION_COUNT_DATA, MISSION_ITEM_DATA, MISSION_REQUEST_DATA, MISSION_REQUEST_LIST_DATA,
};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::{FrameKind, Waiter};
use crate::error::MissionTransferError;
use crate::vehicle::Vehicle;

/// Per-step bound of the handshake. A timeout fails the transfer.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

const AIRDROP_MATCH_DEG: f64 = 1.0e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    Home,
    Takeoff,
    Waypoint,
    ReturnToLaunch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionItem {
    pub seq: u16,
    pub command: MavCmd,
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub hold: f32,
    pub radius: f32,
}

impl MissionItem {
    fn synthetic(seq: u16, command: MavCmd, alt: f64) -> Self {
        Self { seq, command, lat: 0.0, lng: 0.0, alt, hold: 0.0, radius: 0.0 }
    }

    pub fn role(&self) -> ItemRole {
        match self.command {
            MavCmd::MAV_CMD_NAV_WAYPOINT if self.seq == 0 => ItemRole::Home,
            MavCmd::MAV_CMD_NAV_TAKEOFF => ItemRole::Takeoff,
            MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH => ItemRole::ReturnToLaunch,
            _ => ItemRole::Waypoint,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lng, self.alt)
    }

    /// Back to the caller's form; tagged `airdrop` when it sits on `airdrop`.
    pub fn waypoint(&self, airdrop: &Location) -> Waypoint {
        // items travel as f32 degrees, about 1e-5 of slack at these magnitudes
        let on_target = !airdrop.is_unknown()
            && (self.lat - airdrop.lat).abs() < AIRDROP_MATCH_DEG
            && (self.lng - airdrop.lng).abs() < AIRDROP_MATCH_DEG;
        Waypoint {
            lat: self.lat,
            lng: self.lng,
            alt: self.alt,
            wp_type: on_target.then(|| "airdrop".to_string()),
            hold: self.hold,
            radius: self.radius,
        }
    }

    pub fn to_message(&self, target_sys: u8, target_comp: u8) -> MavMessage {
        MavMessage::MISSION_ITEM(MISSION_ITEM_DATA {
            param1: self.hold,
            param2: self.radius,
            param3: 0.0,
            param4: 0.0,
            x: self.lat as f32,
            y: self.lng as f32,
            z: self.alt as f32,
            seq: self.seq,
            command: self.command,
            target_system: target_sys,
            target_component: target_comp,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
            current: 0,
            autocontinue: 1,
            ..Default::default()
        })
    }

    pub fn from_message(msg: &MavMessage) -> Option<Self> {
        match msg {
            MavMessage::MISSION_ITEM(it) => Some(Self {
                seq: it.seq,
                command: it.command,
                lat: it.x as f64,
                lng: it.y as f64,
                alt: it.z as f64,
                hold: it.param1,
                radius: it.param2,
            }),
            MavMessage::MISSION_ITEM_INT(it) => Some(Self {
                seq: it.seq,
                command: it.command,
                lat: it.x as f64 * 1.0e-7,
                lng: it.y as f64 * 1.0e-7,
                alt: it.z as f64,
                hold: it.param1,
                radius: it.param2,
            }),
            _ => None,
        }
    }
}

/// Items in wire order: home, takeoff, caller waypoints, optional RTL.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    items: Vec<MissionItem>,
    airdrop: Option<Location>,
    rtl: bool,
}

impl MissionPlan {
    pub fn build(wps: &[Waypoint], takeoff_alt: f64, rtl: bool) -> Self {
        let mut items = Vec::with_capacity(wps.len() + 3);
        items.push(MissionItem::synthetic(0, MavCmd::MAV_CMD_NAV_WAYPOINT, 0.0));
        items.push(MissionItem::synthetic(1, MavCmd::MAV_CMD_NAV_TAKEOFF, takeoff_alt));

        let mut airdrop = None;
        for wp in wps {
            if wp.is_airdrop() {
                airdrop = Some(wp.location());
            }
            items.push(MissionItem {
                seq: items.len() as u16,
                command: MavCmd::MAV_CMD_NAV_WAYPOINT,
                lat: wp.lat,
                lng: wp.lng,
                alt: wp.alt,
                hold: wp.hold,
                radius: wp.radius,
            });
        }

        if rtl {
            items.push(MissionItem::synthetic(items.len() as u16, MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, 0.0));
        }

        Self { items, airdrop, rtl }
    }

    pub fn items(&self) -> &[MissionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, seq: u16) -> Option<&MissionItem> {
        self.items.get(seq as usize)
    }

    pub fn airdrop(&self) -> Option<Location> {
        self.airdrop
    }

    /// Waypoints the caller supplied, i.e. without home, takeoff and RTL.
    pub fn caller_waypoints(&self) -> usize {
        self.items.len() - 2 - usize::from(self.rtl)
    }
}

/// Payload release point learned from the last uploaded mission;
/// `{0,0,0}` until one carried an airdrop waypoint.
#[derive(Debug, Clone, Default)]
pub struct AirdropTarget(Arc<RwLock<Location>>);

impl AirdropTarget {
    pub fn get(&self) -> Location {
        *self.0.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set(&self, loc: Location) {
        *self.0.write().unwrap_or_else(std::sync::PoisonError::into_inner) = loc;
    }

    pub fn is_known(&self) -> bool {
        !self.get().is_unknown()
    }
}

async fn reply(waiter: Waiter, stage: &'static str) -> Result<MavMessage, MissionTransferError> {
    waiter
        .recv(Some(STEP_TIMEOUT))
        .await
        .map(|f| f.message)
        .ok_or(MissionTransferError::Timeout(stage))
}

/// Upload `plan`; returns the number of caller waypoints on success.
pub async fn upload(vehicle: &Vehicle, plan: &MissionPlan, airdrop: &AirdropTarget) -> Result<usize, MissionTransferError> {
    let (target_system, target_component) = vehicle.target();
    let bus = vehicle.bus();
    let total = plan.len();

    vehicle.send(&MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
        target_system,
        target_component,
        ..Default::default()
    }))?;

    let mut request = bus.waiter(FrameKind::MissionRequest);
    vehicle.send(&MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        count: total as u16,
        target_system,
        target_component,
        ..Default::default()
    }))?;
    info!("mission: uploading {} items", total);

    for sent in 1..=total {
        let seq = match reply(request, "MISSION_REQUEST").await? {
            MavMessage::MISSION_REQUEST(r) => r.seq,
            MavMessage::MISSION_REQUEST_INT(r) => r.seq,
            _ => return Err(MissionTransferError::Timeout("MISSION_REQUEST")),
        };
        let item = plan.item(seq).ok_or(MissionTransferError::UnknownItem(seq))?;

        // Each item is answered by the next request, the last one by an ack;
        // listen before sending.
        request = if sent == total {
            bus.waiter(FrameKind::MissionAck)
        } else {
            bus.waiter(FrameKind::MissionRequest)
        };
        vehicle.send(&item.to_message(target_system, target_component))?;
        debug!("mission: sent item {}", seq);
    }

    if let MavMessage::MISSION_ACK(ack) = reply(request, "MISSION_ACK").await? {
        if ack.mavtype != MavMissionResult::MAV_MISSION_ACCEPTED {
            return Err(MissionTransferError::Rejected(format!("{:?}", ack.mavtype)));
        }
    }

    let count = bus.waiter(FrameKind::MissionCount);
    vehicle.send(&MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
        target_system,
        target_component,
        ..Default::default()
    }))?;
    let acknowledged = match reply(count, "MISSION_COUNT").await? {
        MavMessage::MISSION_COUNT(c) => c.count as usize,
        _ => return Err(MissionTransferError::Timeout("MISSION_COUNT")),
    };

    if acknowledged != total {
        warn!("mission: vehicle holds {} items, {} were sent", acknowledged, total);
        return Err(MissionTransferError::CountMismatch { sent: total, acknowledged });
    }

    if let Some(loc) = plan.airdrop() {
        info!("mission: airdrop target {}", loc);
        airdrop.set(loc);
    }
    info!("mission: upload complete ({} waypoints)", plan.caller_waypoints());
    Ok(plan.caller_waypoints())
}

/// Read the vehicle's mission back and classify it by role.
pub async fn download(vehicle: &Vehicle, airdrop: &AirdropTarget) -> Result<MissionDownload, MissionTransferError> {
    let (target_system, target_component) = vehicle.target();
    let bus = vehicle.bus();

    let count = bus.waiter(FrameKind::MissionCount);
    vehicle.send(&MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
        target_system,
        target_component,
        ..Default::default()
    }))?;
    let count = match reply(count, "MISSION_COUNT").await? {
        MavMessage::MISSION_COUNT(c) => c.count,
        _ => return Err(MissionTransferError::Timeout("MISSION_COUNT")),
    };

    let mut out = MissionDownload { airdrop: airdrop.get(), ..Default::default() };
    if count == 0 {
        info!("mission: vehicle holds no mission");
        return Ok(out);
    }

    for seq in 0..count {
        let item = request_item(vehicle, seq).await?;
        match item.role() {
            ItemRole::Home => out.home_pos = Some(item.location()),
            ItemRole::Takeoff => out.takeoff_alt = Some(item.alt),
            ItemRole::ReturnToLaunch => out.rtl = true,
            ItemRole::Waypoint => out.wps.push(item.waypoint(&out.airdrop)),
        }
    }

    vehicle.send(&MavMessage::MISSION_ACK(MISSION_ACK_DATA {
        target_system,
        target_component,
        mavtype: MavMissionResult::MAV_MISSION_ACCEPTED,
        ..Default::default()
    }))?;
    info!("mission: downloaded {} items ({} waypoints)", count, out.wps.len());
    Ok(out)
}

async fn request_item(vehicle: &Vehicle, seq: u16) -> Result<MissionItem, MissionTransferError> {
    let (target_system, target_component) = vehicle.target();
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;

    let mut waiter = vehicle.bus().waiter(FrameKind::MissionItem);
    vehicle.send(&MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA {
        seq,
        target_system,
        target_component,
        ..Default::default()
    }))?;

    // Guided go-to echoes and stale retransmits can carry another seq.
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = waiter.recv(Some(left)).await.ok_or(MissionTransferError::Timeout("MISSION_ITEM"))?;
        match MissionItem::from_message(&frame.message) {
            Some(item) if item.seq == seq => return Ok(item),
            _ => waiter = vehicle.bus().waiter(FrameKind::MissionItem),
        }
    }
}
