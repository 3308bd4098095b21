//! Telemetry bus: the only reader of the vehicle link.
//!
//! A blocking reader task decodes frames, folds them into the cached
//! [`TelemetrySnapshot`] and hands copies to two kinds of registrations:
//!
//! * persistent subscriptions, which see every frame of their kind for the
//!   life of the bus;
//! * one-shot waiters, which resolve with the first frame of their kind that
//!   arrives after registration and are then dropped.
//!
//! Register a waiter *before* sending the request it answers (see
//! [`TelemetryBus::waiter`]); [`TelemetryBus::wait`] is the register-and-await
//! shorthand for frames that are not a reply to something we just sent.
//!
//! When the link read fails for good the bus closes: every pending waiter
//! resolves to `None` and later waits return `None` immediately.

use gcs_proto::TelemetrySnapshot;
use mavlink::common::{
    MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::MavHeader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::link::{FrameLink, LinkWriter};
use crate::{lock, state};

/// Frame kinds the ground station dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Heartbeat,
    GpsRawInt,
    GlobalPositionInt,
    VfrHud,
    RcChannelsRaw,
    MissionCount,
    /// MISSION_REQUEST and MISSION_REQUEST_INT
    MissionRequest,
    /// MISSION_ITEM and MISSION_ITEM_INT
    MissionItem,
    MissionAck,
    HomePosition,
}

impl FrameKind {
    pub fn of(msg: &MavMessage) -> Option<Self> {
        Some(match msg {
            MavMessage::HEARTBEAT(_) => FrameKind::Heartbeat,
            MavMessage::GPS_RAW_INT(_) => FrameKind::GpsRawInt,
            MavMessage::GLOBAL_POSITION_INT(_) => FrameKind::GlobalPositionInt,
            MavMessage::VFR_HUD(_) => FrameKind::VfrHud,
            MavMessage::RC_CHANNELS_RAW(_) => FrameKind::RcChannelsRaw,
            MavMessage::MISSION_COUNT(_) => FrameKind::MissionCount,
            MavMessage::MISSION_REQUEST(_) | MavMessage::MISSION_REQUEST_INT(_) => FrameKind::MissionRequest,
            MavMessage::MISSION_ITEM(_) | MavMessage::MISSION_ITEM_INT(_) => FrameKind::MissionItem,
            MavMessage::MISSION_ACK(_) => FrameKind::MissionAck,
            MavMessage::HOME_POSITION(_) => FrameKind::HomePosition,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MavHeader,
    pub message: MavMessage,
}

/// A registered one-shot wait. Dropping it abandons the wait.
#[derive(Debug)]
pub struct Waiter {
    kind: FrameKind,
    rx: oneshot::Receiver<Frame>,
}

impl Waiter {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// `None` on timeout or when the bus closes. `timeout: None` waits as
    /// long as the bus lives.
    pub async fn recv(self, timeout: Option<Duration>) -> Option<Frame> {
        match timeout {
            Some(t) => tokio::time::timeout(t, self.rx).await.ok()?.ok(),
            None => self.rx.await.ok(),
        }
    }
}

#[derive(Default)]
struct Registry {
    persistent: HashMap<FrameKind, Vec<mpsc::UnboundedSender<Frame>>>,
    once: HashMap<FrameKind, Vec<oneshot::Sender<Frame>>>,
    /// One-shot waits for the next decoded frame of any type.
    next: Vec<oneshot::Sender<Frame>>,
}

struct Shared {
    link: Arc<dyn FrameLink>,
    writer: Arc<LinkWriter>,
    registry: Mutex<Registry>,
    snapshot: RwLock<TelemetrySnapshot>,
    last_heartbeat: RwLock<Option<HEARTBEAT_DATA>>,
    /// (system, component) of the vehicle once known.
    target: RwLock<Option<(u8, u8)>>,
    /// Flipped under the registry lock so no waiter can slip in after close.
    alive: AtomicBool,
    shutdown: AtomicBool,
    keepalive: Duration,
}

pub struct TelemetryBus {
    shared: Arc<Shared>,
}

impl TelemetryBus {
    /// Spawn the reader and return the running bus. Must be called inside a
    /// tokio runtime.
    pub fn start(writer: Arc<LinkWriter>, keepalive: Duration) -> Arc<Self> {
        let shared = Arc::new(Shared {
            link: writer.link().clone(),
            writer,
            registry: Mutex::new(Registry::default()),
            snapshot: RwLock::new(TelemetrySnapshot::default()),
            last_heartbeat: RwLock::new(None),
            target: RwLock::new(None),
            alive: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            keepalive,
        });

        // Link reads block, so the reader lives on the blocking pool.
        let reader = shared.clone();
        tokio::task::spawn_blocking(move || reader.run());
        info!("bus: started (keepalive every {:?})", keepalive);

        Arc::new(Self { shared })
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Register a one-shot wait for the next `kind` frame.
    pub fn waiter(&self, kind: FrameKind) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut reg = lock(&self.shared.registry);
        if self.is_alive() {
            reg.once.entry(kind).or_default().push(tx);
        }
        // otherwise tx is dropped here and the waiter resolves to None at once
        Waiter { kind, rx }
    }

    /// Block until the next `kind` frame or `timeout`.
    pub async fn wait(&self, kind: FrameKind, timeout: Option<Duration>) -> Option<Frame> {
        self.waiter(kind).recv(timeout).await
    }

    /// Next decoded frame of any type, tracked kind or not. `None` on timeout
    /// or when the bus closes.
    pub async fn next_frame(&self, timeout: Option<Duration>) -> Option<Frame> {
        let (tx, rx) = oneshot::channel();
        {
            let mut reg = lock(&self.shared.registry);
            if self.is_alive() {
                reg.next.push(tx);
            }
        }
        match timeout {
            Some(t) => tokio::time::timeout(t, rx).await.ok()?.ok(),
            None => rx.await.ok(),
        }
    }

    /// Every `kind` frame for the life of the bus. The stream ends when the
    /// bus closes.
    pub fn subscribe(&self, kind: FrameKind) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reg = lock(&self.shared.registry);
        if self.is_alive() {
            reg.persistent.entry(kind).or_default().push(tx);
        }
        rx
    }

    /// Pin heartbeat handling to one vehicle. Until this is called any
    /// autopilot heartbeat counts.
    pub fn set_target(&self, system_id: u8, component_id: u8) {
        *self.shared.target.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some((system_id, component_id));
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.shared.snapshot.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub fn last_heartbeat(&self) -> Option<HEARTBEAT_DATA> {
        self.shared.last_heartbeat.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Ask the reader to stop. Pending and future waits resolve to `None`
    /// immediately; the reader itself exits after its current read returns.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.close();
    }

    #[cfg(test)]
    pub(crate) fn pending_waiters(&self, kind: FrameKind) -> usize {
        lock(&self.shared.registry).once.get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl Drop for TelemetryBus {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

impl Shared {
    fn run(&self) {
        let mut last_keepalive: Option<Instant> = None;

        while !self.shutdown.load(Ordering::Acquire) {
            if last_keepalive.map_or(true, |t| t.elapsed() >= self.keepalive) {
                if let Err(e) = self.writer.send(&gcs_heartbeat()) {
                    warn!("bus: keepalive send failed: {}", e);
                }
                last_keepalive = Some(Instant::now());
            }

            match self.link.recv() {
                Ok(Some((header, message))) => self.dispatch(Frame { header, message }),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    debug!("bus: skipping frame: {}", e);
                }
                Err(LinkError::Closed) => {
                    warn!("bus: link closed by peer");
                    break;
                }
                Err(e) => {
                    error!("bus: link read failed, stopping: {}", e);
                    break;
                }
            }
        }

        self.close();
        info!("bus: reader stopped");
    }

    fn dispatch(&self, frame: Frame) {
        {
            let mut reg = lock(&self.registry);
            for tx in reg.next.drain(..) {
                let _ = tx.send(frame.clone());
            }
        }

        let Some(kind) = FrameKind::of(&frame.message) else { return };
        let foreign = match &frame.message {
            MavMessage::HEARTBEAT(hb) => !state::is_vehicle_heartbeat(hb) || !self.is_target(&frame.header),
            _ => false,
        };

        if !foreign {
            state::apply(
                &mut self.snapshot.write().unwrap_or_else(std::sync::PoisonError::into_inner),
                &frame.message,
            );
            if let MavMessage::HEARTBEAT(hb) = &frame.message {
                *self.last_heartbeat.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(hb.clone());
            }
        }

        let mut reg = lock(&self.registry);
        if let Some(subs) = reg.persistent.get_mut(&kind) {
            subs.retain(|tx| tx.send(frame.clone()).is_ok());
        }

        // A heartbeat from anything but the vehicle never answers a heartbeat
        // wait; leaving the waiters in place keeps them armed for the vehicle's.
        if foreign {
            return;
        }

        if let Some(waiters) = reg.once.remove(&kind) {
            for tx in waiters {
                let _ = tx.send(frame.clone());
            }
        }
    }

    fn is_target(&self, header: &MavHeader) -> bool {
        match *self.target.read().unwrap_or_else(std::sync::PoisonError::into_inner) {
            Some(ids) => ids == (header.system_id, header.component_id),
            None => true,
        }
    }

    fn close(&self) {
        let mut reg = lock(&self.registry);
        self.alive.store(false, Ordering::Release);
        reg.once.clear();
        reg.next.clear();
        reg.persistent.clear();
    }
}

/// Keepalive announcing us as a ground station.
pub fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}
