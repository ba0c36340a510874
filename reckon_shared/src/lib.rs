//! `reckon_shared`
//!
//! Shared libraries used by both the entity server and the tracking client.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (dr, smoothing, net, ecs, math, events).
//! - The extrapolation math is identical on both ends of the wire; the
//!   server measures drift with the same code the client predicts with.
//! - No `unsafe`.

pub mod config;
pub mod console;
pub mod dr;
pub mod ecs;
pub mod event;
pub mod math;
pub mod net;
pub mod smoothing;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::dr::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::smoothing::*;
}
