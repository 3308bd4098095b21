use anyhow::Result;

use crate::FailsafeConfig;

pub fn check_rc(cfg: &FailsafeConfig) -> Result<()> {
    if !cfg.rc_enable {
        return Ok(());
    }
    anyhow::ensure!(cfg.rc_threshold > 800 && cfg.rc_threshold < 1500, "failsafe.rc_threshold out of range (800..1500)");
    anyhow::ensure!(cfg.rc_sample_ms >= 50 && cfg.rc_sample_ms <= 5000, "failsafe.rc_sample_ms should be 50..5000");
    anyhow::ensure!(
        cfg.rc_rtl_after_s < cfg.rc_terminate_after_s,
        "failsafe.rc_rtl_after_s must be below failsafe.rc_terminate_after_s"
    );
    Ok(())
}

pub fn check_endurance(cfg: &FailsafeConfig) -> Result<()> {
    if !cfg.endurance_enable {
        return Ok(());
    }
    anyhow::ensure!(cfg.endurance_s >= 60, "failsafe.endurance_s too small");
    anyhow::ensure!(cfg.extension_s > 0, "failsafe.extension_s must be > 0");
    anyhow::ensure!(cfg.decision_window_s > 0, "failsafe.decision_window_s must be > 0");
    Ok(())
}
