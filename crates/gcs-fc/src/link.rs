use mavlink::{common::MavMessage, error::MessageReadError, MavConnection, MavHeader};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::{ConnectionError, LinkError};

/// One duplex MAVLink link. `recv` is only ever called by the telemetry bus
/// reader; `send` may be called from any task.
pub trait FrameLink: Send + Sync {
    /// Next decoded frame. `Ok(None)` means nothing arrived within the
    /// link's own poll window.
    fn recv(&self) -> Result<Option<(MavHeader, MavMessage)>, LinkError>;

    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Serial { device: String, baud: u32 },
    Sim,
}

impl Transport {
    pub fn parse(kind: &str, address: &str, port: Option<u16>, baud: Option<u32>) -> Result<Self, ConnectionError> {
        match kind {
            "tcp" => Ok(Transport::Tcp { host: address.to_string(), port: port.unwrap_or(5760) }),
            "udp" => Ok(Transport::Udp { host: address.to_string(), port: port.unwrap_or(14550) }),
            "serial" => Ok(Transport::Serial { device: address.to_string(), baud: baud.unwrap_or(57600) }),
            "sim" => Ok(Transport::Sim),
            other => Err(ConnectionError::InvalidTransport(other.to_string())),
        }
    }

    /// Connection string understood by `mavlink::connect`.
    pub fn url(&self) -> Option<String> {
        match self {
            Transport::Tcp { host, port } => Some(format!("tcpout:{}:{}", host, port)),
            // listening on the wildcard address mirrors what SITL/MAVProxy push to
            Transport::Udp { host, port } if host.is_empty() || host == "0.0.0.0" => {
                Some(format!("udpin:0.0.0.0:{}", port))
            }
            Transport::Udp { host, port } => Some(format!("udpout:{}:{}", host, port)),
            Transport::Serial { device, baud } => Some(format!("serial:{}:{}", device, baud)),
            Transport::Sim => None,
        }
    }
}

/// `FrameLink` over a real `mavlink` connection (tcp, udp or serial).
pub struct MavLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
}

impl MavLink {
    /// Blocking; call from a blocking context.
    pub fn open(transport: &Transport) -> Result<Self, ConnectionError> {
        let url = transport
            .url()
            .ok_or_else(|| ConnectionError::InvalidTransport("sim has no wire address".into()))?;
        let conn = mavlink::connect::<MavMessage>(&url).map_err(LinkError::Io)?;
        info!("link: opened {}", url);
        Ok(Self { conn })
    }
}

impl FrameLink for MavLink {
    fn recv(&self) -> Result<Option<(MavHeader, MavMessage)>, LinkError> {
        match self.conn.recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(MessageReadError::Io(e)) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => Ok(None),
                ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected => Err(LinkError::Closed),
                _ => Err(LinkError::Io(e)),
            },
            Err(e) => Err(LinkError::Malformed(e.to_string())),
        }
    }

    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        self.conn
            .send(header, msg)
            .map(|_| ())
            .map_err(|e| LinkError::Write(e.to_string()))
    }
}

/// Stamps outgoing frames with our ids and a running sequence number.
pub struct LinkWriter {
    link: Arc<dyn FrameLink>,
    system_id: u8,
    component_id: u8,
    sequence: AtomicU8,
}

impl LinkWriter {
    pub fn new(link: Arc<dyn FrameLink>, system_id: u8, component_id: u8) -> Self {
        Self { link, system_id, component_id, sequence: AtomicU8::new(0) }
    }

    pub fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        let hdr = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.link.send(&hdr, msg)
    }

    pub fn link(&self) -> &Arc<dyn FrameLink> {
        &self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_urls() {
        let t = Transport::parse("tcp", "acom-sitl", Some(5760), None).unwrap();
        assert_eq!(t.url().as_deref(), Some("tcpout:acom-sitl:5760"));

        let t = Transport::parse("serial", "/dev/ttyACM0", None, Some(115200)).unwrap();
        assert_eq!(t.url().as_deref(), Some("serial:/dev/ttyACM0:115200"));

        let t = Transport::parse("udp", "", Some(14550), None).unwrap();
        assert_eq!(t.url().as_deref(), Some("udpin:0.0.0.0:14550"));

        assert_eq!(Transport::parse("sim", "", None, None).unwrap().url(), None);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = Transport::parse("carrier-pigeon", "x", None, None).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidTransport(k) if k == "carrier-pigeon"));
    }
}
