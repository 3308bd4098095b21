use std::fmt;
use std::str::FromStr;

/// Fixed-wing autopilot flight modes and their custom-mode numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightMode {
    Manual,
    Circle,
    Stabilize,
    Training,
    Acro,
    FlyByWireA,
    FlyByWireB,
    Cruise,
    Autotune,
    Auto,
    Rtl,
    Loiter,
    Takeoff,
    Guided,
}

const MODES: [(FlightMode, u32, &str); 14] = [
    (FlightMode::Manual, 0, "MANUAL"),
    (FlightMode::Circle, 1, "CIRCLE"),
    (FlightMode::Stabilize, 2, "STABILIZE"),
    (FlightMode::Training, 3, "TRAINING"),
    (FlightMode::Acro, 4, "ACRO"),
    (FlightMode::FlyByWireA, 5, "FBWA"),
    (FlightMode::FlyByWireB, 6, "FBWB"),
    (FlightMode::Cruise, 7, "CRUISE"),
    (FlightMode::Autotune, 8, "AUTOTUNE"),
    (FlightMode::Auto, 10, "AUTO"),
    (FlightMode::Rtl, 11, "RTL"),
    (FlightMode::Loiter, 12, "LOITER"),
    (FlightMode::Takeoff, 13, "TAKEOFF"),
    (FlightMode::Guided, 15, "GUIDED"),
];

impl FlightMode {
    pub fn custom_mode(self) -> u32 {
        MODES.iter().find(|(m, _, _)| *m == self).map(|(_, n, _)| *n).unwrap_or_default()
    }

    pub fn from_custom_mode(n: u32) -> Option<Self> {
        MODES.iter().find(|(_, c, _)| *c == n).map(|(m, _, _)| *m)
    }

    pub fn name(self) -> &'static str {
        MODES.iter().find(|(m, _, _)| *m == self).map(|(_, _, s)| *s).unwrap_or("UNKNOWN")
    }

    /// Mode string for a heartbeat's custom mode, including unmapped numbers.
    pub fn describe(custom_mode: u32) -> String {
        match Self::from_custom_mode(custom_mode) {
            Some(m) => m.name().to_string(),
            None => format!("Mode({})", custom_mode),
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let up = s.trim().to_ascii_uppercase();
        MODES
            .iter()
            .find(|(_, _, name)| *name == up)
            .map(|(m, _, _)| *m)
            .ok_or_else(|| format!("unknown flight mode: {}", s))
    }
}
