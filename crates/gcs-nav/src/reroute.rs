//! Guided-mode reroute through a list of points.
//!
//! Each call to [`RerouteEngine::reroute`] takes a new generation number; a
//! running task compares its own number with the current one at every await
//! and bails out once it has been superseded or stopped.

use gcs_fc::{FlightMode, TelemetryError, Vehicle};
use gcs_proto::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::geo;

/// Distance at which a point counts as reached.
pub const ARRIVAL_RADIUS_M: f64 = 1.0;
/// Lead distance of the projected overshoot point.
pub const OVERSHOOT_M: f64 = 40.0;
/// Turns sharper than this are flagged in the log.
pub const SHARP_TURN_DEG: f64 = 80.0;

const POSITION_POLL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum RerouteOutcome {
    Completed,
    /// Stopped or replaced by a newer reroute.
    Superseded,
    Failed(TelemetryError),
}

#[derive(Default)]
pub struct RerouteEngine {
    generation: Arc<AtomicU64>,
}

impl RerouteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is flying and start on `points`. Returns at once; the
    /// handle resolves when this task ends.
    pub fn reroute(&self, vehicle: Arc<Vehicle>, points: Vec<Location>) -> JoinHandle<RerouteOutcome> {
        let token = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let task = Task { vehicle, generation: self.generation.clone(), token };
        info!("reroute: #{} started with {} points", token, points.len());
        tokio::spawn(async move {
            let outcome = task.run(points).await;
            match &outcome {
                RerouteOutcome::Completed => info!("reroute: #{} complete", token),
                RerouteOutcome::Superseded => info!("reroute: #{} cancelled", token),
                RerouteOutcome::Failed(e) => warn!("reroute: #{} failed: {}", token, e),
            }
            outcome
        })
    }

    /// Invalidate the running task, if any. Does not wait for it.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

struct Task {
    vehicle: Arc<Vehicle>,
    generation: Arc<AtomicU64>,
    token: u64,
}

impl Task {
    fn current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.token
    }

    async fn run(&self, points: Vec<Location>) -> RerouteOutcome {
        if let Err(e) = self.vehicle.set_mode(FlightMode::Guided) {
            return RerouteOutcome::Failed(e.into());
        }

        for (i, target) in points.iter().enumerate() {
            if !self.current() {
                return RerouteOutcome::Superseded;
            }
            match self.fly_leg(i, target).await {
                Ok(true) => {}
                Ok(false) => return RerouteOutcome::Superseded,
                Err(e) => return RerouteOutcome::Failed(e),
            }
        }

        if !self.current() {
            return RerouteOutcome::Superseded;
        }
        match self.vehicle.set_mode(FlightMode::Auto) {
            Ok(()) => RerouteOutcome::Completed,
            Err(e) => RerouteOutcome::Failed(e.into()),
        }
    }

    /// `Ok(false)` when superseded part way.
    async fn fly_leg(&self, index: usize, target: &Location) -> Result<bool, TelemetryError> {
        let here = self.vehicle.location().await?;
        if !self.current() {
            return Ok(false);
        }
        let heading = self.vehicle.heading().await?;
        if !self.current() {
            return Ok(false);
        }

        let turn = geo::turn_angle_deg(heading, &here, target);
        let overshoot = geo::point_further_away(&here, target, OVERSHOOT_M);
        debug!(
            "reroute: leg {} turn {:.1} deg{}, overshoot point {}",
            index,
            turn,
            if turn.abs() > SHARP_TURN_DEG { " (sharp)" } else { "" },
            overshoot
        );

        // The exact point is flown; the overshoot point is informational.
        info!("reroute: flying to {}", target);
        self.vehicle.fly_to(*target)?;

        loop {
            if !self.current() {
                return Ok(false);
            }
            let pos = match self.vehicle.gps_location(POSITION_POLL).await {
                Ok(p) => p,
                Err(TelemetryError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            };
            let remaining = geo::distance_m(&pos, target);
            debug!("reroute: {:.1} m to go", remaining);
            if remaining <= ARRIVAL_RADIUS_M {
                info!("reroute: reached point {}", index);
                return Ok(true);
            }
        }
    }
}
