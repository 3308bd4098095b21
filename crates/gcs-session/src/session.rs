//! One ground-station session: the link, the telemetry bus on top of it and
//! the background tasks that live exactly as long as the connection.

use gcs_failsafe::{DecisionPort, EnduranceMonitor, RcMonitor};
use gcs_fc::sim::SimLink;
use gcs_fc::{
    AirdropTarget, ConnectionError, FlightMode, FrameKind, FrameLink, LinkError, LinkWriter, MavLink, TelemetryBus,
    Transport, Vehicle,
};
use gcs_nav::{RerouteEngine, RerouteOutcome};
use gcs_payload::{SerialConnector, WinchAutomation, WinchCell, WinchState};
use gcs_proto::{Location, RelayTelemetry};
use gcs_uplink::{Relay, Sample};
use mavlink::common::MavCmd;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SessionConfig;

struct Active {
    vehicle: Arc<Vehicle>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Session {
    cfg: SessionConfig,
    active: Mutex<Option<Active>>,
    /// Serialises connect attempts.
    connecting: tokio::sync::Mutex<()>,
    winch: WinchCell,
    airdrop: AirdropTarget,
    reroute: RerouteEngine,
    decision: DecisionPort,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            active: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            winch: WinchCell::default(),
            airdrop: AirdropTarget::default(),
            reroute: RerouteEngine::new(),
            decision: DecisionPort::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `transport` and run the heartbeat handshake. A no-op while a
    /// healthy session exists.
    pub async fn connect(
        &self,
        transport: &str,
        address: &str,
        port: Option<u16>,
        baud: Option<u32>,
    ) -> Result<(), ConnectionError> {
        let _guard = self.connecting.lock().await;
        if self.is_connected() {
            debug!("session: already connected");
            return Ok(());
        }

        let transport = Transport::parse(transport, address, port, baud)?;
        info!("session: connecting via {:?}", transport);
        let link: Arc<dyn FrameLink> = match transport {
            Transport::Sim => Arc::new(SimLink::new()),
            wire => {
                let opened = tokio::task::spawn_blocking(move || MavLink::open(&wire))
                    .await
                    .map_err(|e| LinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
                Arc::new(opened)
            }
        };
        self.start(link).await
    }

    /// Same as [`Session::connect`] over an already open link.
    pub async fn connect_link(&self, link: Arc<dyn FrameLink>) -> Result<(), ConnectionError> {
        let _guard = self.connecting.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.start(link).await
    }

    async fn start(&self, link: Arc<dyn FrameLink>) -> Result<(), ConnectionError> {
        // a session whose link died is replaced, not resumed
        self.teardown();

        let cfg = &self.cfg.link;
        let writer = Arc::new(LinkWriter::new(link, cfg.sys_id, cfg.comp_id));
        let bus = TelemetryBus::start(writer.clone(), cfg.keepalive_interval());

        let timeout = cfg.heartbeat_timeout();
        let Some(hb) = bus.wait(FrameKind::Heartbeat, Some(timeout)).await else {
            bus.shutdown();
            warn!("session: no heartbeat within {:?}", timeout);
            return Err(ConnectionError::NoHeartbeat(timeout));
        };
        let (sys, comp) = (hb.header.system_id, hb.header.component_id);
        info!("session: heartbeat from system {} component {}", sys, comp);

        let vehicle = Arc::new(Vehicle::new(bus, writer, sys, comp, cfg.telemetry_timeout()));
        if let Err(e) = vehicle.request_streams(cfg.stream_hz) {
            warn!("session: stream rate request failed: {}", e);
        }

        let tasks = self.spawn_background(&vehicle);
        *self.active() = Some(Active { vehicle, tasks });
        Ok(())
    }

    fn spawn_background(&self, vehicle: &Arc<Vehicle>) -> Vec<JoinHandle<()>> {
        let returning_home = Arc::new(AtomicBool::new(false));
        let fs = &self.cfg.failsafe;
        let mut tasks = Vec::new();
        self.winch.set(WinchState::Disconnected);

        if fs.rc_enable {
            let monitor = RcMonitor::new(fs.rc_timings());
            let run = monitor.run(vehicle.clone(), self.winch.clone(), returning_home.clone());
            tasks.push(tokio::spawn(async move {
                let end = run.await;
                info!("session: rc failsafe ended ({:?})", end);
            }));
        }

        if fs.endurance_enable {
            let monitor = EnduranceMonitor::new(fs.endurance_clock(), fs.decision_window(), self.decision.clone());
            let run = monitor.run(vehicle.clone(), self.winch.clone(), returning_home.clone());
            tasks.push(tokio::spawn(async move {
                let end = run.await;
                info!("session: endurance monitor ended ({:?})", end);
            }));
        }

        let winch_cfg = self.cfg.winch.clone();
        let connector = SerialConnector::new(winch_cfg.devices(), winch_cfg.baud);
        let automation =
            WinchAutomation::new(winch_cfg, vehicle.clone(), self.winch.clone(), self.airdrop.clone(), returning_home);
        tasks.push(tokio::spawn(async move {
            let exit = automation.run(connector).await;
            info!("session: winch automation ended ({:?})", exit);
        }));

        if self.cfg.relay.enable {
            match Relay::new(&self.cfg.relay) {
                Ok(relay) => {
                    let (v, w) = (vehicle.clone(), self.winch.clone());
                    tasks.push(tokio::spawn(relay.run(move || relay_sample(&v, &w))));
                }
                Err(e) => warn!("relay: not started: {:#}", e),
            }
        }

        tasks
    }

    fn teardown(&self) -> bool {
        let Some(active) = self.active().take() else {
            return false;
        };
        self.reroute.stop();
        for task in &active.tasks {
            task.abort();
        }
        active.vehicle.bus().shutdown();
        self.winch.set(WinchState::Disconnected);
        true
    }

    /// Drop the link and stop every background task. False when there was
    /// nothing to drop.
    pub fn disconnect(&self) -> bool {
        let was = self.teardown();
        if was {
            info!("session: disconnected");
        }
        was
    }

    pub fn is_connected(&self) -> bool {
        self.active().as_ref().is_some_and(|a| a.vehicle.is_alive())
    }

    pub fn vehicle(&self) -> Result<Arc<Vehicle>, ConnectionError> {
        match self.active().as_ref() {
            Some(a) if a.vehicle.is_alive() => Ok(a.vehicle.clone()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    pub fn set_mode(&self, mode: FlightMode) -> Result<(), ConnectionError> {
        Ok(self.vehicle()?.set_mode(mode)?)
    }

    pub fn arm(&self) -> Result<(), ConnectionError> {
        Ok(self.vehicle()?.arm()?)
    }

    pub fn disarm(&self) -> Result<(), ConnectionError> {
        Ok(self.vehicle()?.disarm()?)
    }

    /// Raw targeted COMMAND_LONG.
    pub fn send_command(&self, command: MavCmd, params: [f32; 7]) -> Result<(), ConnectionError> {
        Ok(self.vehicle()?.command_long(command, params)?)
    }

    pub fn fly_to(&self, target: Location) -> Result<(), ConnectionError> {
        Ok(self.vehicle()?.fly_to(target)?)
    }

    /// Replace any running reroute with one over `points`.
    pub fn reroute(&self, points: Vec<Location>) -> Result<JoinHandle<RerouteOutcome>, ConnectionError> {
        let vehicle = self.vehicle()?;
        Ok(self.reroute.reroute(vehicle, points))
    }

    pub fn stop_reroute(&self) {
        self.reroute.stop();
    }

    pub fn winch(&self) -> &WinchCell {
        &self.winch
    }

    pub fn airdrop(&self) -> &AirdropTarget {
        &self.airdrop
    }

    pub fn decision(&self) -> &DecisionPort {
        &self.decision
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn relay_sample(vehicle: &Vehicle, winch: &WinchCell) -> Sample {
    if !vehicle.is_alive() {
        return Sample::Stopped;
    }
    match RelayTelemetry::from_snapshot(&vehicle.snapshot(), winch.get().code()) {
        Some(r) => Sample::Ready(r),
        None => Sample::NoFix,
    }
}
