use serde::{Deserialize, Serialize};

use crate::telemetry::Location;

/// One caller-supplied waypoint of a mission upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    /// `"airdrop"` marks the payload release point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wp_type: Option<String>,
    #[serde(default)]
    pub hold: f32,
    #[serde(default)]
    pub radius: f32,
}

impl Waypoint {
    pub fn new(lat: f64, lng: f64, alt: f64) -> Self {
        Self { lat, lng, alt, wp_type: None, hold: 0.0, radius: 0.0 }
    }

    pub fn is_airdrop(&self) -> bool {
        self.wp_type.as_deref() == Some("airdrop")
    }

    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lng, self.alt)
    }
}

/// Validated upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionUpload {
    pub wps: Vec<Waypoint>,
    pub takeoff_alt: f64,
    #[serde(default)]
    pub rtl: bool,
}

/// Mission as read back from the vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDownload {
    pub home_pos: Option<Location>,
    pub takeoff_alt: Option<f64>,
    pub rtl: bool,
    pub airdrop: Location,
    pub wps: Vec<Waypoint>,
}
