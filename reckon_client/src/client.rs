//! Client implementation.
//!
//! The tracking client maintains:
//! - A reliable control stream (handshake + spawns/deletes + text)
//! - An unreliable datagram socket (state updates)
//! - An entity tracker with one dead reckoner per remote entity
//! - A console for runtime smoothing tuning

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use anyhow::Context;
use reckon_shared::{
    config::ReckonConfig,
    console::{Console, CvarFlags, CvarValue},
    net::{ClientId, NetMsg, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
    smoothing::SmoothingConfig,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::tracker::EntityTracker;

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// Handshake done, not yet receiving state updates.
    Connected,
    /// Receiving and tracking state updates.
    Ready,
}

/// High-level tracking client.
pub struct TrackingClient {
    pub client_id: ClientId,
    pub state: ClientState,
    pub console: Console,
    pub tracker: EntityTracker,

    reliable: ReliableConn,
    pub unreliable: UnreliableConn,

    smoothing_defaults: SmoothingConfig,
    epoch: Instant,

    /// Server messages to display.
    pub server_messages: Vec<String>,
}

impl TrackingClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &ReckonConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send updates.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let client_id = match welcome {
            NetMsg::Welcome { client_id } => client_id,
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(client_id = ?client_id, "Connected to server");

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg.smoothing);

        Ok(Self {
            client_id,
            state: ClientState::Connected,
            console,
            tracker: EntityTracker::new(cfg.smoothing),
            reliable,
            unreliable,
            smoothing_defaults: cfg.smoothing,
            epoch: Instant::now(),
            server_messages: Vec::new(),
        })
    }

    fn register_cvars(console: &mut Console, smoothing: &SmoothingConfig) {
        console.register_cvar(
            "cl_smooth_min",
            CvarValue::Float(smoothing.min_window as f64),
            "Shortest smoothing window (s)",
            CvarFlags::ARCHIVE,
        );
        console.register_cvar(
            "cl_smooth_max",
            CvarValue::Float(smoothing.max_window as f64),
            "Longest smoothing window (s)",
            CvarFlags::ARCHIVE,
        );
        console.register_cvar(
            "cl_teleport_dist",
            CvarValue::Float(smoothing.teleport_distance as f64),
            "Positional error (m) that snaps instead of smoothing",
            CvarFlags::ARCHIVE,
        );
    }

    /// Local clock, seconds since connect. All reckoning uses this.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Pulls current smoothing cvars into the tracker.
    pub fn apply_smoothing_cvars(&mut self) {
        let cfg = smoothing_from_cvars(&self.console, self.smoothing_defaults);
        self.tracker.set_smoothing(cfg);
    }

    /// Polls the reliable connection for messages.
    pub async fn poll_reliable(&mut self) -> anyhow::Result<()> {
        // Short timeout to avoid blocking the frame loop.
        match tokio::time::timeout(std::time::Duration::from_millis(10), self.reliable.recv()).await
        {
            Ok(Ok(msg)) => {
                self.handle_reliable_message(msg)?;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Reliable connection error");
                self.state = ClientState::Disconnected;
            }
            Err(_) => {
                // Timeout, no message available.
            }
        }
        Ok(())
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) -> anyhow::Result<()> {
        let now = self.now();
        match msg {
            NetMsg::EntitySpawn(spawn) => {
                self.tracker.spawn(&spawn, now);
            }
            NetMsg::EntityDelete { id } => {
                self.tracker.delete(id);
            }
            NetMsg::ServerPrint { message } => {
                info!(message = %message, "Server message");
                self.server_messages.push(message);
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
        Ok(())
    }

    /// Asks the server to start sending state updates.
    pub async fn send_ready(&mut self) -> anyhow::Result<()> {
        self.unreliable
            .send(&NetMsg::ClientReady {
                client_id: self.client_id,
            })
            .await?;
        self.state = ClientState::Ready;
        info!("Sent ready signal to server");
        Ok(())
    }

    /// Receives state updates over the unreliable channel.
    pub async fn recv_updates(&mut self) -> anyhow::Result<()> {
        while let Some(msg) = self
            .unreliable
            .recv_timeout(std::time::Duration::from_millis(5))
            .await?
        {
            match msg {
                NetMsg::EntityState(update) => {
                    let now = self.now();
                    self.tracker.apply_update(&update, now);
                }
                other => {
                    debug!(?other, "Unexpected UDP message");
                }
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("State: {:?}", self.state));
                out.push(format!("Client ID: {:?}", self.client_id));
                out.push(format!("Tracked entities: {}", self.tracker.len()));
                Ok(out)
            }
            "entities" => {
                let now = self.now();
                let mut out = Vec::new();
                for (id, pose) in self.tracker.poses(now) {
                    let marking = self
                        .tracker
                        .get(id)
                        .map(|t| t.marking.clone())
                        .unwrap_or_default();
                    out.push(format!(
                        "  {:?} \"{}\" at ({:.1}, {:.1}, {:.1})",
                        id, marking, pose.position.x, pose.position.y, pose.position.z
                    ));
                }
                if out.is_empty() {
                    out.push("No tracked entities".to_string());
                }
                Ok(out)
            }
            "disconnect" => {
                self.state = ClientState::Disconnected;
                Ok(vec!["Disconnected".to_string()])
            }
            "quit" | "exit" => {
                std::process::exit(0);
            }
            _ => {
                let out = self.console.exec(line)?;
                // Smoothing cvars take effect immediately.
                self.apply_smoothing_cvars();
                Ok(out)
            }
        }
    }

    /// Returns the underlying reliable connection peer.
    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}

/// Smoothing config as currently set through the console.
fn smoothing_from_cvars(console: &Console, defaults: SmoothingConfig) -> SmoothingConfig {
    SmoothingConfig {
        min_window: console.cvar_f32("cl_smooth_min", defaults.min_window),
        max_window: console.cvar_f32("cl_smooth_max", defaults.max_window),
        teleport_distance: console.cvar_f32("cl_teleport_dist", defaults.teleport_distance),
        interval_history: defaults.interval_history,
    }
}
