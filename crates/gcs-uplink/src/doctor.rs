use crate::endpoint::Endpoint;
use crate::RelayConfig;
use anyhow::Result;

pub fn check_relay(cfg: &RelayConfig) -> Result<()> {
    if !cfg.enable {
        return Ok(());
    }
    Endpoint::parse(&cfg.endpoint)?;
    anyhow::ensure!(cfg.rate_hz > 0.0 && cfg.rate_hz <= 50.0, "relay.rate_hz must be in (0, 50]");
    anyhow::ensure!(cfg.timeout_ms >= 100, "relay.timeout_ms too small; set >= 100");
    Ok(())
}
