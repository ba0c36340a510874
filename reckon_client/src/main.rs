//! Standalone viewer binary.
//!
//! Usage:
//!   cargo run -p reckon_client -- [--addr 127.0.0.1:40000] [--config cfg.json]
//!
//! Connects to the server, tracks remote entities with dead reckoning, and
//! periodically prints their poses. A text-mode stand-in for a 3D viewer.
//!
//! Console commands:
//!   status     - Show client status
//!   entities   - List tracked entities and poses
//!   disconnect - Drop the connection
//!   quit       - Exit viewer
//!
//! Smoothing cvars (cl_smooth_min, cl_smooth_max, cl_teleport_dist) can be
//! set live.

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use reckon_client::client::{ClientState, TrackingClient};
use reckon_client::tracker::TrackerEvent;
use reckon_shared::config::ReckonConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};

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
    info!(server = %cfg.server_addr, "Starting viewer");

    let mut client = TrackingClient::connect(&cfg).await.context("connect")?;
    client.send_ready().await?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Viewer connected. Type 'entities' to list poses, 'quit' to exit.");
    println!();

    let frame_interval = Duration::from_secs_f32(1.0 / cfg.frame_hz as f32);
    let mut frame: u64 = 0;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match client.exec_console(&line).await {
                Ok(output) => {
                    for out in output {
                        println!("{}", out);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        client.poll_reliable().await?;

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        client.recv_updates().await?;

        // Report tracker events.
        for event in client.tracker.events.drain::<TrackerEvent>() {
            match event {
                TrackerEvent::Appeared { id, marking } => {
                    info!(?id, %marking, "Entity appeared");
                }
                TrackerEvent::Removed { id } => {
                    info!(?id, "Entity removed");
                }
                TrackerEvent::Teleported { id } => {
                    info!(?id, "Entity teleported");
                }
                TrackerEvent::StaleDropped { id, sequence } => {
                    debug!(?id, sequence, "Stale update dropped");
                }
                TrackerEvent::Updated { id, window } => {
                    debug!(?id, window, "Update applied");
                }
            }
        }

        // Print poses about once a second.
        if frame % cfg.frame_hz as u64 == 0 && !client.tracker.is_empty() {
            let now = client.now();
            for (id, pose) in client.tracker.poses(now) {
                debug!(
                    ?id,
                    x = pose.position.x,
                    y = pose.position.y,
                    z = pose.position.z,
                    "Pose"
                );
            }
        }
        frame += 1;

        tokio::time::sleep(frame_interval).await;
    }

    Ok(())
}
