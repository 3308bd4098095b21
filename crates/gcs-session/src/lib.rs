pub mod api;
pub mod error;
pub mod session;

use gcs_failsafe::FailsafeConfig;
use gcs_fc::LinkConfig;
use gcs_payload::WinchConfig;
use gcs_uplink::RelayConfig;

pub use api::{ApiResponse, Controller};
pub use error::{ApiError, ValidationError};
pub use session::Session;

/// Everything a session needs to connect and run its background tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub link: LinkConfig,
    pub failsafe: FailsafeConfig,
    pub winch: WinchConfig,
    pub relay: RelayConfig,
}
