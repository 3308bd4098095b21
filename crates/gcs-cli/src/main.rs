mod config;
mod http;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use config::{load_config, Config};
use gcs_failsafe::doctor as failsafe_doctor;
use gcs_fc::Transport;
use gcs_session::{ApiResponse, Controller, Session};
use gcs_uplink::doctor as relay_doctor;

#[derive(Debug, Parser)]
#[command(name = "gcs", version, about = "groundlink - MAVLink ground control backend")]
struct Cli {
    #[arg(long, default_value = "config/gcs.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// Run the HTTP surface; connects at startup when [link] says where to.
    Serve,
    Mission {
        #[command(subcommand)]
        cmd: MissionCmd,
    },
    Fc {
        #[command(subcommand)]
        cmd: FcCmd,
    },
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Upload a mission JSON file (`{"wps": [...], "takeoffAlt": .., "rtl": ..}`).
    Upload { file: String },
    /// Print the mission currently on the vehicle.
    Download,
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Connect, wait for telemetry and print the vehicle state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Serve => serve(&cfg).await?,
        Command::Mission { cmd } => mission_cmd(&cfg, cmd).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let link = &cfg.link;
    if let Some(kind) = &link.transport {
        let address = link.address.as_deref().unwrap_or_default();
        Transport::parse(kind, address, link.port, link.baud).context("link.transport")?;
        if kind != "sim" {
            anyhow::ensure!(!address.is_empty(), "link.address missing");
        }
        anyhow::ensure!(link.port.map_or(true, |p| p > 0), "link.port must be > 0");
        anyhow::ensure!(link.baud.map_or(true, |b| b > 0), "link.baud must be > 0");
    } else {
        info!("doctor: no link.transport, serve will wait for POST /aircraft/connect");
    }
    anyhow::ensure!(link.heartbeat_timeout_ms >= 500, "link.heartbeat_timeout_ms too small");
    anyhow::ensure!(link.stream_hz > 0.0 && link.stream_hz <= 50.0, "link.stream_hz should be in (0, 50]");

    cfg.api.bind.parse::<std::net::SocketAddr>().context("api.bind is not host:port")?;

    failsafe_doctor::check_rc(&cfg.failsafe)?;
    failsafe_doctor::check_endurance(&cfg.failsafe)?;
    relay_doctor::check_relay(&cfg.relay)?;

    if cfg.winch.enable {
        anyhow::ensure!(cfg.winch.baud > 0, "winch.baud invalid");
        anyhow::ensure!(cfg.winch.allowed_radius_m > 0.0, "winch.allowed_radius_m must be > 0");
        anyhow::ensure!(!cfg.winch.devices().is_empty(), "winch has no candidate devices");
    }

    info!("doctor: OK");
    Ok(())
}

/// Session connected per `[link]`, for the one-shot subcommands.
async fn connect(cfg: &Config) -> Result<Arc<Session>> {
    let link = &cfg.link;
    let kind = link.transport.as_deref().context("no link.transport configured")?;
    let address = link.address.as_deref().unwrap_or_default();

    let mut session_cfg = cfg.session();
    // one-shot commands never fly failsafe actions on their own
    session_cfg.failsafe.rc_enable = false;
    session_cfg.failsafe.endurance_enable = false;
    session_cfg.winch.enable = false;
    session_cfg.relay.enable = false;

    let session = Arc::new(Session::new(session_cfg));
    session
        .connect(kind, address, link.port, link.baud)
        .await
        .with_context(|| format!("connect {} {}", kind, address))?;
    Ok(session)
}

fn print_reply(r: ApiResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&r.body)?);
    anyhow::ensure!(r.status < 300, "request failed with {}", r.status);
    Ok(())
}

async fn mission_cmd(cfg: &Config, cmd: MissionCmd) -> Result<()> {
    let session = connect(cfg).await?;
    let api = Controller::new(session.clone());
    let result = match cmd {
        MissionCmd::Upload { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("read {}", file))?;
            let body: Value = serde_json::from_str(&raw).context("parse mission json")?;
            print_reply(api.upload_mission(Some(&body)).await)
        }
        MissionCmd::Download => print_reply(api.download_mission().await),
    };
    session.disconnect();
    result
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Status => {
            let session = connect(cfg).await?;
            let vehicle = session.vehicle()?;
            let hb = vehicle.heartbeat().await.context("vehicle heartbeat")?;
            let loc = vehicle.location().await.ok();
            let snap = vehicle.snapshot();
            let (sys, comp) = vehicle.target();

            println!("connected=true target={}/{}", sys, comp);
            println!("mode={} armed={} status={}", hb.mode, hb.armed, hb.system_status);
            match loc {
                Some(l) => println!("location={}", l),
                None => println!("location=unknown"),
            }
            println!("heading={:?} groundspeed={:?} rc3={:?}", snap.heading, snap.groundspeed, snap.rc_channel3);
            if let Some(ms) = snap.last_heartbeat_unix_ms {
                let now_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
                println!("last_heartbeat_age_ms={}", now_ms - ms);
            }
            session.disconnect();
        }
    }
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let session = Arc::new(Session::new(cfg.session()));

    if let (Some(kind), Some(address)) = (&cfg.link.transport, &cfg.link.address) {
        match session.connect(kind, address, cfg.link.port, cfg.link.baud).await {
            Ok(()) => info!("serve: connected to {} {}", kind, address),
            Err(e) => warn!("serve: startup connect failed, waiting for POST /aircraft/connect: {}", e),
        }
    }

    let app = http::router(Arc::new(Controller::new(session.clone())));
    let listener = tokio::net::TcpListener::bind(&cfg.api.bind)
        .await
        .with_context(|| format!("bind {}", cfg.api.bind))?;
    info!("serve: listening on {}", cfg.api.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("serve: ctrl-c handler failed: {}", e);
            }
        })
        .await
        .context("http server")?;

    session.disconnect();
    info!("serve: stopped");
    Ok(())
}
