//! Serial link to the winch controller.
//!
//! Line protocol at 9600 baud: we write `uas1` and the controller answers a
//! `uas` line; drops are started with `AIRDROPBEGIN1`, cancelled with
//! `AIRDROPCANCEL1`, and finish with an `AIRDROPCOMPLETE` line.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

pub const HANDSHAKE: &str = "uas1";
pub const HANDSHAKE_REPLY: &str = "uas";
pub const BEGIN_DROP: &str = "AIRDROPBEGIN1";
pub const CANCEL_DROP: &str = "AIRDROPCANCEL1";
pub const DROP_COMPLETE: &str = "AIRDROPCOMPLETE";

/// Controller boot time after the port opens (it resets on DTR).
const WAKE_UP: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("winch controller not found on {0:?}")]
    NotFound(Vec<String>),

    #[error("winch serial: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("winch i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{dev}: unexpected handshake reply {got:?}")]
    Handshake { dev: String, got: String },

    #[error("winch serial closed")]
    Closed,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
    ]
}

/// An open winch controller session.
pub trait WinchDevice: Send {
    fn send_command(&mut self, cmd: &str) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Resolves once the controller reports the drop finished.
    fn wait_for_completion(&mut self) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// Finds and opens a [`WinchDevice`].
pub trait WinchConnector: Send + Sync {
    type Device: WinchDevice;

    fn open(&self) -> impl Future<Output = Result<Self::Device, DeviceError>> + Send;
}

pub struct SerialWinch {
    dev: String,
    port: BufReader<SerialStream>,
}

impl SerialWinch {
    pub async fn open(dev: &str, baud: u32) -> Result<Self, DeviceError> {
        let port = tokio_serial::new(dev, baud).open_native_async()?;
        let mut winch = Self { dev: dev.to_string(), port: BufReader::new(port) };

        tokio::time::sleep(WAKE_UP).await;
        winch.write(HANDSHAKE).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, winch.read_line())
            .await
            .map_err(|_| DeviceError::Handshake { dev: dev.to_string(), got: String::new() })??;
        if reply != HANDSHAKE_REPLY {
            return Err(DeviceError::Handshake { dev: dev.to_string(), got: reply });
        }
        info!("winch: controller found on {}", dev);
        Ok(winch)
    }

    async fn write(&mut self, s: &str) -> Result<(), DeviceError> {
        let port = self.port.get_mut();
        port.write_all(s.as_bytes()).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, DeviceError> {
        let mut line = String::new();
        let n = self.port.read_line(&mut line).await?;
        if n == 0 {
            return Err(DeviceError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl WinchDevice for SerialWinch {
    async fn send_command(&mut self, cmd: &str) -> Result<(), DeviceError> {
        debug!("winch: {} -> {}", self.dev, cmd);
        self.write(cmd).await
    }

    async fn wait_for_completion(&mut self) -> Result<(), DeviceError> {
        loop {
            let line = self.read_line().await?;
            if line == DROP_COMPLETE {
                return Ok(());
            }
            debug!("winch: {} <- {}", self.dev, line);
        }
    }
}

/// Probes devices in order and keeps the first that answers the handshake.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    devices: Vec<String>,
    baud: u32,
}

impl SerialConnector {
    pub fn new(devices: Vec<String>, baud: u32) -> Self {
        Self { devices, baud }
    }
}

impl WinchConnector for SerialConnector {
    type Device = SerialWinch;

    async fn open(&self) -> Result<SerialWinch, DeviceError> {
        for dev in &self.devices {
            match SerialWinch::open(dev, self.baud).await {
                Ok(w) => return Ok(w),
                Err(e) => warn!("winch: probe {} failed: {}", dev, e),
            }
        }
        Err(DeviceError::NotFound(self.devices.clone()))
    }
}
