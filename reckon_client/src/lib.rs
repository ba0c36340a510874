//! `reckon_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Per-entity dead reckoning between updates
//! - Smoothing of freshly received ground truth into the predicted pose
//! - Stale/reordered update rejection

pub mod client;
pub mod reckoner;
pub mod tracker;

pub use client::TrackingClient;
