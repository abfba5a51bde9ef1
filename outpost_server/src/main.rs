//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p outpost_server -- [--config outpost.json] [--addr 127.0.0.1:40000] [--tick-hz 64]
//!
//! Flags override values loaded from `--config`. Each tick the driver runs
//! single steps until the socket is drained or `max_steps_per_tick` is hit.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use outpost_server::GameServer;
use outpost_shared::config::ServerConfig;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    addr: Option<String>,
    tick_hz: Option<u32>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                let hz = args[i + 1]
                    .parse()
                    .with_context(|| format!("invalid --tick-hz {}", args[i + 1]))?;
                out.tick_hz = Some(hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut cfg = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(hz) = args.tick_hz {
        cfg.tick_hz = hz;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(parse_args()?)?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        ack_window = cfg.ack_window,
        "Starting server"
    );

    let mut server = GameServer::bind(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let tick_interval = std::time::Duration::from_secs_f64(1.0 / f64::from(cfg.tick_hz.max(1)));
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let consumed = server.run_until_idle(cfg.max_steps_per_tick)?;
                if consumed > 0 {
                    debug!(consumed, clients = server.num_clients(), "Tick");
                }
            }
            _ = &mut shutdown => {
                info!(
                    clients = server.num_clients(),
                    objects = server.num_game_objects(),
                    "Server shutting down"
                );
                return Ok(());
            }
        }
    }
}
