use serde::{Deserialize, Serialize};

/// Global position: degrees, degrees, metres MSL.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
}

impl Location {
    pub const fn new(lat: f64, lng: f64, alt: f64) -> Self {
        Self { lat, lng, alt }
    }

    /// `{0,0,0}` is used as "not known yet".
    pub fn is_unknown(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0 && self.alt == 0.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lat={:.7},lng={:.7},alt={:.1}", self.lat, self.lng, self.alt)
    }
}

/// Decoded vehicle heartbeat, as returned by the control routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub mav_type: String,
    pub autopilot: String,
    pub base_mode: u8,
    pub custom_mode: u32,
    pub system_status: String,
    pub armed: bool,
    pub mode: String,
}

/// Latest cached vehicle state. Fields stay `None` until the frame that
/// carries them has been seen at least once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub alt: Option<f64>,
    pub heading: Option<f64>,
    pub groundspeed: Option<f64>,
    pub armed: Option<bool>,
    pub mode: Option<String>,
    pub rc_channel3: Option<u16>,
    pub last_heartbeat_unix_ms: Option<i64>,
}

impl TelemetrySnapshot {
    pub fn location(&self) -> Option<Location> {
        Some(Location::new(self.lat?, self.lng?, self.alt?))
    }
}

/// Body of one relay push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayTelemetry {
    pub latitude_dege7: f64,
    pub longitude_dege7: f64,
    pub altitude_msl_m: f64,
    pub heading_deg: f64,
    pub groundspeed_m_s: f64,
    pub chan3_raw: u16,
    pub winch_status: u8,
}

impl RelayTelemetry {
    pub fn from_snapshot(snap: &TelemetrySnapshot, winch_status: u8) -> Option<Self> {
        let loc = snap.location()?;
        Some(Self {
            latitude_dege7: loc.lat * 1e7,
            longitude_dege7: loc.lng * 1e7,
            altitude_msl_m: loc.alt,
            heading_deg: snap.heading.unwrap_or_default(),
            groundspeed_m_s: snap.groundspeed.unwrap_or_default(),
            chan3_raw: snap.rc_channel3.unwrap_or_default(),
            winch_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_requires_a_position_fix() {
        let mut snap = TelemetrySnapshot::default();
        assert!(RelayTelemetry::from_snapshot(&snap, 1).is_none());

        snap.lat = Some(49.2572585);
        snap.lng = Some(-123.2423108);
        snap.alt = Some(77.0);
        snap.rc_channel3 = Some(1500);
        let r = RelayTelemetry::from_snapshot(&snap, 4).unwrap();
        assert!((r.latitude_dege7 - 492_572_585.0).abs() < 1e-3);
        assert_eq!(r.chan3_raw, 1500);
        assert_eq!(r.winch_status, 4);
        assert_eq!(r.heading_deg, 0.0);
    }

    #[test]
    fn unknown_location_is_all_zero() {
        assert!(Location::default().is_unknown());
        assert!(!Location::new(0.0, 0.0, 1.0).is_unknown());
    }
}
