pub mod mission;
pub mod telemetry;

pub use mission::{MissionDownload, MissionUpload, Waypoint};
pub use telemetry::{HeartbeatInfo, Location, RelayTelemetry, TelemetrySnapshot};
