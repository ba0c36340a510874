//! Configuration system.
//!
//! Loads simulator configuration from JSON strings/files (file IO left to
//! the binaries). Threshold and smoothing defaults live here so server,
//! client, and tests agree on one baseline.

use serde::{Deserialize, Serialize};

use crate::smoothing::SmoothingConfig;

/// Drift limits that gate state-update publication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PublishThresholds {
    /// Maximum quiet time between updates for one entity, seconds.
    pub heartbeat: f32,
    /// Minimum time between updates for one entity, seconds. Wins over the
    /// heartbeat: two updates are never closer than this.
    pub min_interval: f32,
    /// Positional drift (meters) between the remote-predicted and actual
    /// position that forces an update.
    pub max_translation_error: f32,
    /// Orientation drift (degrees) that forces an update.
    pub max_rotation_error_deg: f32,
    /// Velocity divergence (m/s) from the last published velocity that
    /// forces an update.
    pub max_velocity_delta: f32,
}

impl Default for PublishThresholds {
    fn default() -> Self {
        Self {
            heartbeat: 5.0,
            min_interval: 0.05,
            max_translation_error: 0.5,
            max_rotation_error_deg: 3.0,
            max_velocity_delta: 1.0,
        }
    }
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReckonConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed server simulation tick rate.
    pub tick_hz: u32,
    /// Client frame rate for pose extrapolation.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    /// Publish-threshold policy applied per entity on the server.
    #[serde(default)]
    pub thresholds: PublishThresholds,
    /// Smoothing policy applied per entity on the client.
    #[serde(default)]
    pub smoothing: SmoothingConfig,
}

fn default_frame_hz() -> u32 {
    60
}

impl Default for ReckonConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 30,
            frame_hz: default_frame_hz(),
            thresholds: PublishThresholds::default(),
            smoothing: SmoothingConfig::default(),
        }
    }
}

impl ReckonConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
