//! `reckon_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop driving scripted movers
//! - Per-entity publish-threshold evaluation
//! - Sends `EntityState` updates only when remote prediction has drifted
//!
//! Networking model:
//! - TCP: handshake/control plane (spawns, deletes, text)
//! - UDP: state plane (threshold-gated kinematic updates)

pub mod mover;
pub mod publish;
pub mod server;

pub use server::SimServer;
