pub mod doctor;
pub mod endpoint;

use anyhow::{bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use endpoint::{Endpoint, Scheme};
use gcs_proto::RelayTelemetry;
use rand::Rng;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// `[relay]` section of the ground station config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enable: bool,
    /// `http://` or `https://` URL the telemetry is POSTed to.
    pub endpoint: String,
    pub rate_hz: f64,
    pub timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enable: false, endpoint: String::new(), rate_hz: 10.0, timeout_ms: 3000 }
    }
}

impl RelayConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz.max(0.1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkHealth {
    pub rtt_ms: Option<u32>,
    pub consecutive_failures: u32,
    pub sent: u64,
}

/// What the relay source has to offer on a given tick.
#[derive(Debug, Clone)]
pub enum Sample {
    Ready(RelayTelemetry),
    /// Connected but no position yet.
    NoFix,
    /// Session gone; the relay task ends.
    Stopped,
}

/// Delay before the next attempt after `failures` consecutive failures.
/// Doubles from 200ms with up to 10% jitter, capped at 10s.
pub fn backoff_delay(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let base = BACKOFF_BASE.saturating_mul(1u32 << failures.min(10).saturating_sub(1));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 10);
    (base + Duration::from_millis(jitter_ms)).min(BACKOFF_CAP)
}

pub struct Relay {
    endpoint: Endpoint,
    tls: Option<TlsConnector>,
    timeout: Duration,
    interval: Duration,
    health: LinkHealth,
}

impl Relay {
    pub fn new(cfg: &RelayConfig) -> Result<Self> {
        let endpoint = Endpoint::parse(&cfg.endpoint)?;
        let tls = match endpoint.scheme {
            Scheme::Http => None,
            Scheme::Https => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                let cfg = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
                Some(TlsConnector::from(Arc::new(cfg)))
            }
        };
        Ok(Self { endpoint, tls, timeout: cfg.timeout(), interval: cfg.interval(), health: LinkHealth::default() })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn link_health(&self) -> &LinkHealth {
        &self.health
    }

    /// POST one record. Returns the HTTP status on a 2xx reply.
    pub async fn post(&mut self, record: &RelayTelemetry) -> Result<u16> {
        let body = serde_json::to_vec(record).context("relay: encode telemetry")?;
        let req = request(&self.endpoint, &body);
        let start = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.send(&req))
            .await
            .with_context(|| format!("relay: no reply within {}ms", self.timeout.as_millis()))
            .and_then(|r| r);

        match result {
            Ok(status) => {
                self.health.rtt_ms = Some(start.elapsed().as_millis() as u32);
                if self.health.consecutive_failures > 0 {
                    info!("relay: {} reachable again after {} failures", self.endpoint, self.health.consecutive_failures);
                }
                self.health.consecutive_failures = 0;
                self.health.sent += 1;
                Ok(status)
            }
            Err(e) => {
                self.health.consecutive_failures += 1;
                Err(e)
            }
        }
    }

    async fn send(&self, req: &[u8]) -> Result<u16> {
        let tcp = TcpStream::connect(self.endpoint.addr())
            .await
            .with_context(|| format!("relay: connect {}", self.endpoint.addr()))?;
        match &self.tls {
            None => exchange(tcp, req).await,
            Some(tls) => {
                let name = ServerName::try_from(self.endpoint.host.clone()).context("relay: invalid server name")?;
                let stream = tls.connect(name, tcp).await.context("relay: tls handshake")?;
                exchange(stream, req).await
            }
        }
    }

    /// Push samples at the configured rate until the source reports
    /// `Stopped`. Failures are logged and backed off, never returned.
    pub async fn run<F>(mut self, mut source: F)
    where
        F: FnMut() -> Sample + Send,
    {
        info!("relay: pushing to {} every {}ms", self.endpoint, self.interval.as_millis());
        loop {
            tokio::time::sleep(self.interval).await;
            let record = match source() {
                Sample::Ready(r) => r,
                Sample::NoFix => {
                    debug!("relay: no position fix yet");
                    continue;
                }
                Sample::Stopped => {
                    info!("relay: session closed, stopping");
                    return;
                }
            };
            if let Err(e) = self.post(&record).await {
                let delay = backoff_delay(self.health.consecutive_failures);
                warn!(
                    "relay: post failed (failures: {}, retry in {}ms): {:#}",
                    self.health.consecutive_failures,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn request(ep: &Endpoint, body: &[u8]) -> Bytes {
    let head = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        ep.path,
        ep.host,
        body.len()
    );
    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.put_slice(head.as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(stream: S, req: &[u8]) -> Result<u16> {
    let mut stream = BufReader::new(stream);
    stream.write_all(req).await?;
    stream.flush().await?;

    let mut line = String::new();
    stream.read_line(&mut line).await.context("relay: read status line")?;
    let status = parse_status(&line)?;
    if !(200..300).contains(&status) {
        bail!("relay: endpoint answered {}", status);
    }
    Ok(status)
}

fn parse_status(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(v), Some(code)) if v.starts_with("HTTP/") => code.parse().with_context(|| format!("relay: bad status {:?}", code)),
        _ => bail!("relay: malformed status line {:?}", line.trim_end()),
    }
}
