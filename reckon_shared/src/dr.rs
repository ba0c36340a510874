//! Dead-reckoning core.
//!
//! Kinematic extrapolation used on both sides of the wire: the server runs
//! the same extrapolation as the remotes do against its last published state
//! to measure drift, and the client runs it to predict a remote entity's
//! pose between updates.
//!
//! Algorithms mirror the usual DIS family: hold the last pose, advance by
//! velocity, or advance by velocity plus constant acceleration. Orientation
//! is integrated from a world-axis angular velocity in all non-static modes.

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// Extrapolation algorithm for a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DrAlgorithm {
    /// No extrapolation and no smoothing; raw updates are shown as they land.
    None,
    /// Pose held fixed between updates, but corrections are smoothed.
    Static,
    /// First-order: position advances by velocity.
    #[default]
    VelocityOnly,
    /// Second-order: position advances by velocity and constant acceleration.
    VelocityAndAcceleration,
}

/// Ground-truth kinematics replicated for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct KinematicState {
    pub position: Vec3,
    pub rotation: Quat,
    /// Linear velocity, m/s.
    pub velocity: Vec3,
    /// Linear acceleration, m/s^2.
    pub acceleration: Vec3,
    /// Angular velocity about world axes, rad/s.
    pub angular_velocity: Vec3,
}

/// A displayed position/orientation pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl KinematicState {
    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// Advances a known state `dt` seconds into the future.
///
/// `dt <= 0` returns the state's own pose unchanged.
pub fn extrapolate(state: &KinematicState, algorithm: DrAlgorithm, dt: f32) -> Pose {
    if dt <= 0.0 {
        return state.pose();
    }

    match algorithm {
        DrAlgorithm::None | DrAlgorithm::Static => state.pose(),
        DrAlgorithm::VelocityOnly => Pose {
            position: state.position + state.velocity * dt,
            rotation: integrate_rotation(state.rotation, state.angular_velocity, dt),
        },
        DrAlgorithm::VelocityAndAcceleration => Pose {
            position: state.position + state.velocity * dt + state.acceleration * (0.5 * dt * dt),
            rotation: integrate_rotation(state.rotation, state.angular_velocity, dt),
        },
    }
}

/// Applies a constant angular velocity over `dt` to an orientation.
pub fn integrate_rotation(rotation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    let angle = angular_velocity.len() * dt;
    if angle < 1e-9 {
        return rotation;
    }
    (Quat::from_axis_angle(angular_velocity, angle) * rotation).normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-4
    }

    #[test]
    fn static_holds_pose() {
        let state = KinematicState {
            position: Vec3::new(1.0, 2.0, 3.0),
            velocity: Vec3::new(10.0, 0.0, 0.0),
            ..Default::default()
        };
        let pose = extrapolate(&state, DrAlgorithm::Static, 2.0);
        assert_eq!(pose.position, state.position);
    }

    #[test]
    fn velocity_only_matches_closed_form() {
        let state = KinematicState {
            position: Vec3::new(0.0, 0.0, 0.0),
            velocity: Vec3::new(3.0, -1.0, 0.5),
            acceleration: Vec3::new(100.0, 100.0, 100.0), // must be ignored
            ..Default::default()
        };
        let pose = extrapolate(&state, DrAlgorithm::VelocityOnly, 2.0);
        assert!(close(pose.position, Vec3::new(6.0, -2.0, 1.0)));
    }

    #[test]
    fn velocity_and_acceleration_matches_closed_form() {
        let state = KinematicState {
            position: Vec3::new(1.0, 0.0, 0.0),
            velocity: Vec3::new(2.0, 0.0, 0.0),
            acceleration: Vec3::new(0.0, 4.0, 0.0),
            ..Default::default()
        };
        // p + v t + a t^2 / 2 at t = 3.
        let pose = extrapolate(&state, DrAlgorithm::VelocityAndAcceleration, 3.0);
        assert!(close(pose.position, Vec3::new(7.0, 18.0, 0.0)));
    }

    #[test]
    fn negative_dt_is_a_no_op() {
        let state = KinematicState {
            velocity: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let pose = extrapolate(&state, DrAlgorithm::VelocityOnly, -0.25);
        assert_eq!(pose.position, state.position);
    }

    #[test]
    fn rotation_integrates_angular_velocity() {
        let state = KinematicState {
            angular_velocity: Vec3::new(0.0, 0.0, 0.5), // rad/s about Z
            ..Default::default()
        };
        let pose = extrapolate(&state, DrAlgorithm::VelocityOnly, 2.0);
        let expected = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 1.0);
        assert!(pose.rotation.angle_to(expected) < 1e-3);
    }

    #[test]
    fn zero_angular_velocity_keeps_rotation() {
        let rot = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), 0.3);
        assert_eq!(integrate_rotation(rot, Vec3::ZERO, 1.0), rot);
    }
}
