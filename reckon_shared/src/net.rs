//! Networking primitives.
//!
//! Two planes, as in most entity-state simulators:
//! - TCP carries the control plane: handshake, entity spawns/deletes, text.
//! - UDP carries the state plane: threshold-gated kinematic updates that may
//!   arrive late, duplicated, reordered, or not at all.
//!
//! Serialization is explicit JSON with a version field so either end can
//! refuse a mismatched peer. State updates carry a per-entity sequence
//! number; receivers drop anything at or below the last accepted sequence.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    time,
};

use crate::{
    dr::{DrAlgorithm, KinematicState},
    ecs::EntityId,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why the server decided to publish a state update.
///
/// Carried on the wire for diagnostics; receivers do not branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishReason {
    /// First update after the entity entered the world.
    InitialState,
    /// Maximum quiet time elapsed with no threshold crossed.
    Heartbeat,
    /// Remote-predicted position drifted past the translation threshold.
    TranslationDrift,
    /// Remote-predicted orientation drifted past the rotation threshold.
    RotationDrift,
    /// Actual velocity diverged from the published velocity.
    VelocityChange,
    /// Explicitly requested (console command, despawn-preceding flush).
    Forced,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    Welcome {
        client_id: ClientId,
    },
    /// Client signals it is ready to receive state updates.
    ClientReady {
        client_id: ClientId,
    },

    // ─── Entity replication ───
    /// Server introduces an entity to the client.
    EntitySpawn(EntitySpawn),
    /// Server publishes fresh ground truth for one entity.
    EntityState(StateUpdate),
    /// Server removes an entity.
    EntityDelete {
        id: EntityId,
    },

    // ─── Console/control ───
    /// Server -> client: print message to console.
    ServerPrint {
        message: String,
    },
    /// Client -> server: console command line.
    ClientCommand {
        command: String,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Entity introduction packet, sent reliably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawn {
    pub id: EntityId,
    /// Human-readable entity label (DIS-style marking text).
    pub marking: String,
    /// Algorithm remotes should extrapolate this entity with.
    pub algorithm: DrAlgorithm,
    /// Ground truth at spawn time.
    pub initial: KinematicState,
}

/// Threshold-gated ground-truth update, sent unreliably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateUpdate {
    pub id: EntityId,
    /// Strictly increasing per entity; stale sequences are dropped.
    pub sequence: u32,
    /// Server simulation time at publish, seconds since session start.
    pub sim_time: f64,
    pub reason: PublishReason,
    pub state: KinematicState,
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize msg")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
        Ok(msg)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<NetMsg> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
        Ok(msg)
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(e).context("udp recv"),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn netmsg_roundtrip_bytes() {
        let msg = NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn state_update_roundtrip() {
        let msg = NetMsg::EntityState(StateUpdate {
            id: EntityId(7),
            sequence: 42,
            sim_time: 1.5,
            reason: PublishReason::TranslationDrift,
            state: KinematicState {
                position: Vec3::new(1.0, 2.0, 3.0),
                velocity: Vec3::new(0.5, 0.0, 0.0),
                ..Default::default()
            },
        });
        let back = decode_from_bytes(&encode_to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(msg, back);
    }
}
