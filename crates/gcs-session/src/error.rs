use gcs_fc::{ConnectionError, LinkError, MissionTransferError, TelemetryError};
use serde_json::json;
use thiserror::Error;

use crate::api::ApiResponse;

pub const NOT_CONNECTED: &str = "Aircraft connection has not been established";

/// Request body problems. Each variant keeps its own status code; clients
/// branch on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("IP address was not specified")]
    MissingIpAddress,
    #[error("Port was not specified")]
    MissingPort,
    #[error("No waypoints were given")]
    NoWaypoints,
    #[error("Takeoff altitude was not given")]
    MissingTakeoffAlt,
    #[error("Takeoff altitude must be >0")]
    NonPositiveTakeoffAlt,
    #[error("Mission format is invalid")]
    InvalidMission,
    #[error("{0}")]
    BadRequest(String),
}

impl ValidationError {
    pub fn status(&self) -> u16 {
        match self {
            ValidationError::MissingIpAddress => 401,
            ValidationError::MissingPort => 402,
            ValidationError::NoWaypoints => 402,
            ValidationError::MissingTakeoffAlt => 403,
            ValidationError::NonPositiveTakeoffAlt => 404,
            ValidationError::InvalidMission => 405,
            ValidationError::BadRequest(_) => 400,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("Waypoints failed to upload.")]
    Upload(#[source] MissionTransferError),
    #[error("Waypoints failed to download.")]
    Download(#[source] MissionTransferError),
    #[error("No endurance decision is pending")]
    NoPendingDecision,
}

impl From<LinkError> for ApiError {
    fn from(e: LinkError) -> Self {
        ApiError::Connection(ConnectionError::Link(e))
    }
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Validation(v) => v.status(),
            ApiError::Connection(_) => 400,
            ApiError::Telemetry(TelemetryError::Timeout(_) | TelemetryError::Silent(_)) => 504,
            ApiError::Telemetry(_) => 400,
            ApiError::Upload(_) | ApiError::Download(_) => 401,
            ApiError::NoPendingDecision => 409,
        }
    }

    pub fn response(&self) -> ApiResponse {
        let msg = match self {
            ApiError::Connection(ConnectionError::NotConnected) | ApiError::Telemetry(TelemetryError::LinkLost) => {
                NOT_CONNECTED.to_string()
            }
            other => other.to_string(),
        };
        ApiResponse::new(self.status(), json!({ "error": msg }))
    }
}
