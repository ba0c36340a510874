//! Server implementation.
//!
//! An authoritative fixed-timestep entity simulator. Each tick it:
//! - steps every scripted mover,
//! - asks each entity's publisher whether the remotes' dead-reckoned view
//!   has drifted past the thresholds (or a heartbeat is due),
//! - sends `EntityState` datagrams only for entities that crossed a
//!   threshold.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in simulation code; publish
//!   decisions use accumulated sim time, not `Instant::now`.
//! - Use stable ordering when iterating collections.

use anyhow::Context;
use rand::Rng;
use reckon_shared::{
    config::{PublishThresholds, ReckonConfig},
    console::{Console, CvarFlags, CvarValue},
    ecs::{EntityId, Kinematics, Marking, World},
    math::Vec3,
    net::{
        ClientId, EntitySpawn, NetMsg, PublishReason, ReliableConn, ReliableListener,
        PROTOCOL_VERSION,
    },
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    mover::{BallisticMover, CircuitMover, MotionModel, WaypointMover},
    publish::{PublishStats, UpdatePublisher},
};

/// Connected client state.
struct ClientState {
    _id: ClientId,
    reliable: ReliableConn,
    udp_peer: SocketAddr,
    /// Whether the client asked for state updates yet.
    ready: bool,
}

/// Entity simulator and update publisher.
pub struct SimServer {
    pub cfg: ReckonConfig,
    pub console: Console,
    world: World,
    movers: HashMap<EntityId, Box<dyn MotionModel>>,
    publishers: HashMap<EntityId, UpdatePublisher>,
    clients: HashMap<ClientId, ClientState>,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u64,
    sim_time: f64,
    started_at: chrono::DateTime<chrono::Utc>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl SimServer {
    /// Creates a new server with the given config.
    pub async fn new(cfg: ReckonConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(tcp.local_addr()?).await.context("udp bind")?;

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg);

        Ok(Self {
            cfg,
            console,
            world: World::default(),
            movers: HashMap::new(),
            publishers: HashMap::new(),
            clients: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            sim_time: 0.0,
            started_at: chrono::Utc::now(),
            console_rx: None,
        })
    }

    fn register_cvars(console: &mut Console, cfg: &ReckonConfig) {
        console.register_cvar(
            "sv_tick_hz",
            CvarValue::Int(cfg.tick_hz as i64),
            "Server tick rate",
            CvarFlags::SERVER_ONLY,
        );
        let t = &cfg.thresholds;
        console.register_cvar(
            "dr_heartbeat",
            CvarValue::Float(t.heartbeat as f64),
            "Max seconds between updates per entity",
            CvarFlags::SERVER_ONLY,
        );
        console.register_cvar(
            "dr_min_interval",
            CvarValue::Float(t.min_interval as f64),
            "Min seconds between updates per entity",
            CvarFlags::SERVER_ONLY,
        );
        console.register_cvar(
            "dr_max_trans_error",
            CvarValue::Float(t.max_translation_error as f64),
            "Positional drift (m) that forces an update",
            CvarFlags::SERVER_ONLY,
        );
        console.register_cvar(
            "dr_max_rot_error",
            CvarValue::Float(t.max_rotation_error_deg as f64),
            "Orientation drift (deg) that forces an update",
            CvarFlags::SERVER_ONLY,
        );
        console.register_cvar(
            "dr_max_vel_delta",
            CvarValue::Float(t.max_velocity_delta as f64),
            "Velocity divergence (m/s) that forces an update",
            CvarFlags::SERVER_ONLY,
        );
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn entity_count(&self) -> usize {
        self.movers.len()
    }

    /// Aggregated publish stats across all entities.
    pub fn publish_stats(&self) -> PublishStats {
        let mut total = PublishStats::default();
        for p in self.publishers.values() {
            let s = p.stats();
            total.initial += s.initial;
            total.heartbeat += s.heartbeat;
            total.translation += s.translation;
            total.rotation += s.rotation;
            total.velocity += s.velocity;
            total.forced += s.forced;
            total.rate_limited += s.rate_limited;
        }
        total
    }

    /// Spawns an entity driven by the given mover and announces it.
    pub async fn spawn_entity(
        &mut self,
        marking: String,
        initial: Kinematics,
        mover: Box<dyn MotionModel>,
    ) -> anyhow::Result<EntityId> {
        let id = self.world.spawn();
        let algorithm = mover.preferred_algorithm();

        self.world.insert(id, initial);
        self.world.insert(id, Marking(marking.clone()));
        self.movers.insert(id, mover);
        let thresholds = self.current_thresholds();
        self.publishers
            .insert(id, UpdatePublisher::new(id, thresholds, algorithm));

        let spawn = EntitySpawn {
            id,
            marking: marking.clone(),
            algorithm,
            initial: initial.state(),
        };
        self.broadcast_reliable(&NetMsg::EntitySpawn(spawn)).await;

        info!(id = ?id, marking = %marking, algorithm = ?algorithm, "Entity spawned");
        Ok(id)
    }

    /// Removes an entity, flushing one final forced update first so remotes
    /// end on ground truth.
    pub async fn despawn_entity(&mut self, id: EntityId) -> anyhow::Result<()> {
        let Some(kin) = self.world.get::<Kinematics>(id).copied() else {
            anyhow::bail!("no such entity: {:?}", id);
        };

        let final_update = self
            .publishers
            .get_mut(&id)
            .map(|p| p.mark_published(&kin.state(), self.sim_time, PublishReason::Forced));
        if let Some(update) = final_update {
            self.send_to_ready(&NetMsg::EntityState(update)).await;
        }

        self.world.remove::<Kinematics>(id);
        self.world.remove::<Marking>(id);
        self.movers.remove(&id);
        self.publishers.remove(&id);

        self.broadcast_reliable(&NetMsg::EntityDelete { id }).await;
        info!(id = ?id, "Entity despawned");
        Ok(())
    }

    /// Accepts exactly one client (blocking handshake).
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let msg = conn.recv().await?;
        match msg {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                let udp_hello = conn.recv().await?;
                let client_udp_port = match udp_hello {
                    NetMsg::UdpHello { client_udp_port } => client_udp_port,
                    other => anyhow::bail!("expected UdpHello, got {other:?}"),
                };

                let id = ClientId::new_unique();
                conn.send(&NetMsg::Welcome { client_id: id }).await?;

                // Replay the current entity population.
                for eid in self.world.ids::<Kinematics>() {
                    let (Some(kin), Some(marking), Some(publisher)) = (
                        self.world.get::<Kinematics>(eid),
                        self.world.get::<Marking>(eid),
                        self.publishers.get(&eid),
                    ) else {
                        continue;
                    };
                    conn.send(&NetMsg::EntitySpawn(EntitySpawn {
                        id: eid,
                        marking: marking.0.clone(),
                        algorithm: publisher.algorithm(),
                        initial: kin.state(),
                    }))
                    .await?;
                }

                let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
                self.clients.insert(
                    id,
                    ClientState {
                        _id: id,
                        reliable: conn,
                        udp_peer,
                        ready: false,
                    },
                );

                info!(client_id = ?id, %udp_peer, "Client connected");
                Ok(id)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.recv_udp().await?;
        self.apply_threshold_cvars();
        self.simulate(dt_sec);
        self.publish_updates().await?;
        self.tick += 1;
        self.sim_time += dt_sec as f64;
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        // Collect lines first to avoid borrow conflict.
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            match self.exec_console(&line).await {
                Ok(output) => {
                    for out in output {
                        println!("{}", out);
                    }
                }
                Err(e) => println!("Error: {}", e),
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
            "spawn" => {
                if tokens.len() < 2 {
                    return Ok(vec!["Usage: spawn <circuit|waypoint|ballistic> [n]".to_string()]);
                }
                let count: usize = tokens.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
                let mut out = Vec::new();
                for _ in 0..count {
                    match self.spawn_scattered(tokens[1]).await {
                        Ok(id) => out.push(format!("Spawned {:?}", id)),
                        Err(e) => out.push(format!("Spawn failed: {}", e)),
                    }
                }
                Ok(out)
            }
            "despawn" => {
                if tokens.len() < 2 {
                    return Ok(vec!["Usage: despawn <id>".to_string()]);
                }
                let Ok(raw) = tokens[1].parse::<u64>() else {
                    return Ok(vec![format!("Bad entity id: {}", tokens[1])]);
                };
                match self.despawn_entity(EntityId(raw)).await {
                    Ok(()) => Ok(vec![format!("Despawned {}", raw)]),
                    Err(e) => Ok(vec![format!("Despawn failed: {}", e)]),
                }
            }
            "status" => {
                let stats = self.publish_stats();
                let mut out = Vec::new();
                out.push(format!("Session started: {}", self.started_at.to_rfc3339()));
                out.push(format!("Tick: {} (sim time {:.2}s)", self.tick, self.sim_time));
                out.push(format!("Entities: {}", self.entity_count()));
                for eid in self.world.ids::<Marking>() {
                    if let (Some(marking), Some(kin)) = (
                        self.world.get::<Marking>(eid),
                        self.world.get::<Kinematics>(eid),
                    ) {
                        out.push(format!(
                            "  {:?} \"{}\" at ({:.1}, {:.1}, {:.1})",
                            eid, marking.0, kin.position.x, kin.position.y, kin.position.z
                        ));
                    }
                }
                out.push(format!("Clients: {}", self.clients.len()));
                let mut client_ids: Vec<ClientId> = self.clients.keys().copied().collect();
                client_ids.sort_by_key(|c| c.0);
                for id in client_ids {
                    if let Some(client) = self.clients.get(&id) {
                        out.push(format!(
                            "  {:?}: udp={} ready={}",
                            id, client.udp_peer, client.ready
                        ));
                    }
                }
                out.push(format!(
                    "Published: {} (initial {}, heartbeat {}, trans {}, rot {}, vel {}, forced {}); rate-limited {}",
                    stats.published(),
                    stats.initial,
                    stats.heartbeat,
                    stats.translation,
                    stats.rotation,
                    stats.velocity,
                    stats.forced,
                    stats.rate_limited,
                ));
                Ok(out)
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                std::process::exit(0);
            }
            _ => self.console.exec(line),
        }
    }

    /// Spawns one entity of the named mover kind with scattered parameters.
    async fn spawn_scattered(&mut self, kind: &str) -> anyhow::Result<EntityId> {
        let (marking, initial, mover) = scattered_mover(kind, self.movers.len())?;
        self.spawn_entity(marking, initial, mover).await
    }

    async fn recv_udp(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Ok(msg) = serde_json::from_slice::<NetMsg>(&buf[..n]) {
                        self.handle_udp_message(from, msg);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(())
    }

    fn handle_udp_message(&mut self, from: SocketAddr, msg: NetMsg) {
        match msg {
            NetMsg::ClientReady { client_id } => {
                if let Some(c) = self.clients.get_mut(&client_id) {
                    c.udp_peer = from;
                    c.ready = true;
                    info!(client_id = ?client_id, "Client ready");
                } else {
                    warn!(client_id = ?client_id, "Ready from unknown client");
                }
            }
            NetMsg::ClientCommand { command } => {
                debug!(command = %command, "Client command received");
            }
            _ => {
                debug!(?msg, "Unexpected UDP message");
            }
        }
    }

    /// Thresholds as currently set through the console.
    fn current_thresholds(&self) -> PublishThresholds {
        let defaults = self.cfg.thresholds;
        PublishThresholds {
            heartbeat: self.console.cvar_f32("dr_heartbeat", defaults.heartbeat),
            min_interval: self.console.cvar_f32("dr_min_interval", defaults.min_interval),
            max_translation_error: self
                .console
                .cvar_f32("dr_max_trans_error", defaults.max_translation_error),
            max_rotation_error_deg: self
                .console
                .cvar_f32("dr_max_rot_error", defaults.max_rotation_error_deg),
            max_velocity_delta: self
                .console
                .cvar_f32("dr_max_vel_delta", defaults.max_velocity_delta),
        }
    }

    /// Pulls current threshold cvars into every publisher.
    fn apply_threshold_cvars(&mut self) {
        let thresholds = self.current_thresholds();
        for publisher in self.publishers.values_mut() {
            publisher.set_thresholds(thresholds);
        }
    }

    fn simulate(&mut self, dt_sec: f32) {
        if dt_sec <= 0.0 {
            return;
        }
        let mut ids: Vec<EntityId> = self.movers.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(mover) = self.movers.get_mut(&id) else {
                continue;
            };
            if let Some(kin) = self.world.get_mut::<Kinematics>(id) {
                mover.step(kin, dt_sec);
            }
        }
    }

    async fn publish_updates(&mut self) -> anyhow::Result<()> {
        let mut outgoing = Vec::new();
        for id in self.world.ids::<Kinematics>() {
            let Some(kin) = self.world.get::<Kinematics>(id) else {
                continue;
            };
            let Some(publisher) = self.publishers.get_mut(&id) else {
                continue;
            };
            let state = kin.state();
            if let Some(reason) = publisher.evaluate(&state, self.sim_time) {
                let update = publisher.mark_published(&state, self.sim_time, reason);
                debug!(id = ?id, reason = ?reason, seq = update.sequence, "Publishing update");
                outgoing.push(NetMsg::EntityState(update));
            }
        }

        for msg in outgoing {
            self.send_to_ready(&msg).await;
        }
        Ok(())
    }

    async fn send_to_ready(&self, msg: &NetMsg) {
        let Ok(payload) = serde_json::to_vec(msg) else {
            return;
        };
        for c in self.clients.values() {
            if c.ready {
                let _ = self.udp.send_to(&payload, c.udp_peer).await;
            }
        }
    }

    async fn broadcast_reliable(&mut self, msg: &NetMsg) {
        let mut dead = Vec::new();
        for (id, c) in self.clients.iter_mut() {
            if let Err(e) = c.reliable.send(msg).await {
                warn!(client_id = ?id, error = %e, "Reliable send failed, dropping client");
                dead.push(*id);
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }
}

/// Builds a randomized mover of the named kind.
///
/// Kept synchronous: `ThreadRng` must not live across an await.
fn scattered_mover(
    kind: &str,
    n: usize,
) -> anyhow::Result<(String, Kinematics, Box<dyn MotionModel>)> {
    let mut rng = rand::thread_rng();
    match kind {
        "circuit" => {
            let center = Vec3::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0), 0.0);
            let radius = rng.gen_range(5.0..30.0);
            let rate = rng.gen_range(0.2..1.0);
            let mover: Box<dyn MotionModel> =
                Box::new(CircuitMover::new(center, radius, rate, rng.gen_range(0.0..6.28)));
            let initial = Kinematics {
                position: center + Vec3::new(radius, 0.0, 0.0),
                ..Default::default()
            };
            Ok((format!("circuit-{n}"), initial, mover))
        }
        "waypoint" => {
            let mut waypoints = Vec::new();
            for _ in 0..4 {
                waypoints.push(Vec3::new(
                    rng.gen_range(-40.0..40.0),
                    rng.gen_range(-40.0..40.0),
                    0.0,
                ));
            }
            let speed = rng.gen_range(2.0..12.0);
            let initial = Kinematics {
                position: waypoints[0],
                ..Default::default()
            };
            let mover: Box<dyn MotionModel> = Box::new(WaypointMover::new(waypoints, speed));
            Ok((format!("waypoint-{n}"), initial, mover))
        }
        "ballistic" => {
            let launch = Vec3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(8.0..20.0),
            );
            let initial = Kinematics {
                position: Vec3::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0), 0.0),
                velocity: launch,
                ..Default::default()
            };
            let mover: Box<dyn MotionModel> = Box::new(BallisticMover::new(launch, 0.0));
            Ok((format!("ballistic-{n}"), initial, mover))
        }
        other => anyhow::bail!("unknown mover kind: {}", other),
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(SimServer, ReckonConfig)> {
    let cfg = ReckonConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };

    let mut server = SimServer::new(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.server_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
