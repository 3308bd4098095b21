//! Proximity-triggered airdrop.
//!
//! Open the controller (retrying forever), wait for the airdrop target, then
//! watch the position until it is inside the allowed radius: loiter, run the
//! drop, return to auto. One drop attempt per session: an emergency reel
//! during the drop ends it and the aircraft is left to whoever asked for the
//! reel.

use gcs_fc::{AirdropTarget, FlightMode, TelemetryError, Vehicle};
use gcs_nav::geo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceError, WinchConnector, WinchDevice, BEGIN_DROP, CANCEL_DROP};
use crate::winch::{WinchCell, WinchState};
use crate::WinchConfig;

/// How often a running drop checks for an emergency reel request.
const REEL_CHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationExit {
    Disabled,
    Completed,
    /// The endurance monitor committed to RTL before a drop started.
    ReturningHome,
    /// A running drop was reeled in and cancelled.
    Reeled,
    LinkLost,
}

enum DropResult {
    Completed,
    Reeled,
}

pub struct WinchAutomation {
    cfg: WinchConfig,
    vehicle: Arc<Vehicle>,
    winch: WinchCell,
    airdrop: AirdropTarget,
    returning_home: Arc<AtomicBool>,
}

impl WinchAutomation {
    pub fn new(
        cfg: WinchConfig,
        vehicle: Arc<Vehicle>,
        winch: WinchCell,
        airdrop: AirdropTarget,
        returning_home: Arc<AtomicBool>,
    ) -> Self {
        Self { cfg, vehicle, winch, airdrop, returning_home }
    }

    fn returning_home(&self) -> bool {
        self.returning_home.load(Ordering::Acquire)
    }

    pub async fn run<C: WinchConnector>(self, connector: C) -> AutomationExit {
        if !self.cfg.enable {
            info!("winch: automation disabled");
            return AutomationExit::Disabled;
        }

        let mut device = loop {
            match connector.open().await {
                Ok(d) => break d,
                Err(e) => {
                    warn!("winch: {}; retrying", e);
                    if !self.vehicle.is_alive() {
                        return AutomationExit::LinkLost;
                    }
                    tokio::time::sleep(self.cfg.retry_interval()).await;
                }
            }
        };
        info!("winch: controller ready");
        self.winch.set(WinchState::Standby);

        while !self.airdrop.is_known() {
            if self.returning_home() {
                return AutomationExit::ReturningHome;
            }
            if !self.vehicle.is_alive() {
                return AutomationExit::LinkLost;
            }
            debug!("winch: waiting for airdrop target");
            tokio::time::sleep(self.cfg.retry_interval()).await;
        }
        let target = self.airdrop.get();
        info!("winch: airdrop target {}", target);

        loop {
            if self.returning_home() {
                info!("winch: returning home, drop abandoned");
                return AutomationExit::ReturningHome;
            }

            if self.winch.get() == WinchState::EmergencyReel {
                if let Err(e) = self.reel_in(&mut device, &connector).await {
                    return e;
                }
                continue;
            }

            let here = match self.vehicle.location().await {
                Ok(l) => l,
                Err(TelemetryError::LinkLost) => return AutomationExit::LinkLost,
                Err(e) => {
                    warn!("winch: failed to get location: {}", e);
                    continue;
                }
            };

            let dist = geo::distance_m(&target, &here);
            debug!("winch: {:.2} m from target", dist);
            if dist < self.cfg.allowed_radius_m && !self.returning_home() {
                match self.drop_payload(&mut device).await {
                    Ok(DropResult::Completed) => return AutomationExit::Completed,
                    Ok(DropResult::Reeled) => return AutomationExit::Reeled,
                    Err(e) => {
                        error!("winch: drop failed: {}", e);
                        self.winch.set(WinchState::Error);
                        match self.reopen(&connector).await {
                            Ok(d) => device = d,
                            Err(exit) => return exit,
                        }
                    }
                }
            }

            tokio::time::sleep(self.cfg.poll_interval()).await;
        }
    }

    async fn drop_payload<D: WinchDevice>(&self, device: &mut D) -> Result<DropResult, DeviceError> {
        info!("winch: in target radius, loitering");
        if let Err(e) = self.vehicle.set_mode(FlightMode::Loiter) {
            warn!("winch: loiter command failed: {}", e);
        }
        self.winch.set(WinchState::InProgress);
        device.send_command(BEGIN_DROP).await?;
        info!("winch: drop started");

        let reeled = {
            let completion = device.wait_for_completion();
            tokio::pin!(completion);
            loop {
                tokio::select! {
                    done = &mut completion => break done.map(|_| false)?,
                    _ = tokio::time::sleep(REEL_CHECK) => {
                        if self.winch.get() == WinchState::EmergencyReel {
                            break true;
                        }
                    }
                }
            }
        };

        if reeled {
            // whoever asked for the reel owns the flight mode
            warn!("winch: emergency reel during drop, drop cancelled");
            device.send_command(CANCEL_DROP).await?;
            self.winch.clear_emergency_reel();
            return Ok(DropResult::Reeled);
        }

        info!("winch: drop complete");
        if let Err(e) = self.vehicle.set_mode(FlightMode::Auto) {
            warn!("winch: auto command failed: {}", e);
        }
        self.winch.set(WinchState::Complete);
        Ok(DropResult::Completed)
    }

    async fn reel_in<C: WinchConnector>(&self, device: &mut C::Device, connector: &C) -> Result<(), AutomationExit> {
        warn!("winch: emergency reel");
        match device.send_command(CANCEL_DROP).await {
            Ok(()) => {
                self.winch.clear_emergency_reel();
                Ok(())
            }
            Err(e) => {
                error!("winch: cancel failed: {}", e);
                *device = self.reopen(connector).await?;
                Ok(())
            }
        }
    }

    async fn reopen<C: WinchConnector>(&self, connector: &C) -> Result<C::Device, AutomationExit> {
        loop {
            tokio::time::sleep(self.cfg.retry_interval()).await;
            if !self.vehicle.is_alive() {
                return Err(AutomationExit::LinkLost);
            }
            match connector.open().await {
                Ok(d) => {
                    info!("winch: controller reopened");
                    return Ok(d);
                }
                Err(e) => warn!("winch: {}; retrying", e),
            }
        }
    }
}
