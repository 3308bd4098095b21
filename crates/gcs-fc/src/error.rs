use std::time::Duration;
use thiserror::Error;

use crate::bus::FrameKind;

/// Failures of the underlying duplex link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,

    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded. The stream itself is still usable.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame write failed: {0}")]
    Write(String),
}

impl LinkError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Malformed(_))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("aircraft connection has not been established")]
    NotConnected,

    #[error("invalid connection type: {0}")]
    InvalidTransport(String),

    #[error("no heartbeat from vehicle within {0:?}")]
    NoHeartbeat(Duration),

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("no {0:?} frame within the telemetry timeout")]
    Timeout(FrameKind),

    #[error("no frame of any kind within {0:?}")]
    Silent(Duration),

    #[error("telemetry link lost")]
    LinkLost,

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Error)]
pub enum MissionTransferError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("waypoints failed to upload: sent {sent}, vehicle holds {acknowledged}")]
    CountMismatch { sent: usize, acknowledged: usize },

    #[error("vehicle requested unknown mission item {0}")]
    UnknownItem(u16),

    #[error("vehicle rejected the mission: {0}")]
    Rejected(String),

    #[error(transparent)]
    Link(#[from] LinkError),
}
