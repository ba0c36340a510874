//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p reckon_server -- [--addr 127.0.0.1:40000] [--tick-hz 30] [--config cfg.json]
//!
//! The server listens for client connections, runs a fixed timestep
//! simulation, and publishes threshold-gated entity state updates.
//!
//! Console commands:
//!   spawn <circuit|waypoint|ballistic> [n]  - Spawn scripted entities
//!   despawn <id>                            - Remove an entity
//!   status                                  - Show server status
//!   quit                                    - Shutdown server
//!
//! Threshold cvars (dr_heartbeat, dr_max_trans_error, ...) can be set live.

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use reckon_server::server::SimServer;
use reckon_shared::config::ReckonConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ReckonConfig> {
    let mut cfg = ReckonConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                let text = std::fs::read_to_string(&args[i + 1])
                    .with_context(|| format!("read config {}", args[i + 1]))?;
                cfg = ReckonConfig::from_json_str(&text).context("parse config")?;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            _ => i += 1,
        }
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

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = SimServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'spawn circuit 3' to add entities, 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(client_id = ?cid, "New client accepted");
        }

        server.step(tick_interval.as_secs_f32()).await?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
