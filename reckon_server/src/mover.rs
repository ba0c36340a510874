//! Scripted motion models.
//!
//! The server drives entities along deterministic paths so the publish
//! thresholds have real kinematics to chew on. Each mover must keep the
//! `Kinematics` velocity/acceleration/angular-velocity fields truthful,
//! because published states are extrapolated from exactly those fields on
//! the far side.

use reckon_shared::{
    dr::DrAlgorithm,
    ecs::Kinematics,
    math::{Quat, Vec3},
};

/// Advances one entity's kinematics by a fixed timestep.
pub trait MotionModel: Send + Sync {
    fn step(&mut self, kin: &mut Kinematics, dt: f32);

    /// Algorithm remotes should extrapolate this mover's entity with.
    fn preferred_algorithm(&self) -> DrAlgorithm;
}

/// Constant-rate circle in the XY plane. Smooth, continuously accelerating
/// motion; second-order extrapolation tracks it well between updates.
pub struct CircuitMover {
    pub center: Vec3,
    pub radius: f32,
    /// Angular rate around the circuit, rad/s.
    pub rate: f32,
    phase: f32,
}

impl CircuitMover {
    pub fn new(center: Vec3, radius: f32, rate: f32, phase: f32) -> Self {
        Self {
            center,
            radius,
            rate,
            phase,
        }
    }
}

impl MotionModel for CircuitMover {
    fn step(&mut self, kin: &mut Kinematics, dt: f32) {
        self.phase += self.rate * dt;
        let (sin, cos) = self.phase.sin_cos();
        let r = self.radius;
        let w = self.rate;

        kin.position = self.center + Vec3::new(cos * r, sin * r, 0.0);
        kin.velocity = Vec3::new(-sin * r * w, cos * r * w, 0.0);
        // Centripetal, pointing at the center.
        kin.acceleration = Vec3::new(-cos * r * w * w, -sin * r * w * w, 0.0);
        // Nose along the direction of travel.
        kin.rotation =
            Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), self.phase + std::f32::consts::FRAC_PI_2);
        kin.angular_velocity = Vec3::new(0.0, 0.0, w);
    }

    fn preferred_algorithm(&self) -> DrAlgorithm {
        DrAlgorithm::VelocityAndAcceleration
    }
}

/// Straight legs between waypoints at constant speed, snap turns at each
/// corner. The turns are deliberate rotation-threshold exercise: heading is
/// discontinuous while angular velocity stays zero.
pub struct WaypointMover {
    pub waypoints: Vec<Vec3>,
    pub speed: f32,
    target: usize,
}

impl WaypointMover {
    pub fn new(waypoints: Vec<Vec3>, speed: f32) -> Self {
        Self {
            waypoints,
            speed,
            target: 0,
        }
    }
}

impl MotionModel for WaypointMover {
    fn step(&mut self, kin: &mut Kinematics, dt: f32) {
        if self.waypoints.is_empty() || dt <= 0.0 {
            return;
        }

        let wp = self.waypoints[self.target];
        let dist = (wp - kin.position).len();
        let mut travel = self.speed * dt;

        // Corner reached mid-step: snap to it and spend only the leftover
        // travel on the next leg, so one tick never covers more than
        // speed * dt.
        if dist <= travel {
            kin.position = wp;
            travel -= dist;
            self.target = (self.target + 1) % self.waypoints.len();
        }

        let old_velocity = kin.velocity;
        match (self.waypoints[self.target] - kin.position).try_normalized() {
            Some(dir) => {
                kin.velocity = dir * self.speed;
                kin.position = kin.position + dir * travel;
                kin.rotation =
                    Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), dir.y.atan2(dir.x));
            }
            None => {
                kin.velocity = Vec3::ZERO;
            }
        }
        kin.acceleration = (kin.velocity - old_velocity) * (1.0 / dt);
        kin.angular_velocity = Vec3::ZERO;
    }

    fn preferred_algorithm(&self) -> DrAlgorithm {
        DrAlgorithm::VelocityOnly
    }
}

/// Repeating vertical launch under constant gravity.
pub struct BallisticMover {
    pub gravity: f32,
    pub launch_velocity: Vec3,
    pub ground_z: f32,
}

impl BallisticMover {
    pub fn new(launch_velocity: Vec3, ground_z: f32) -> Self {
        Self {
            gravity: 9.81,
            launch_velocity,
            ground_z,
        }
    }
}

impl MotionModel for BallisticMover {
    fn step(&mut self, kin: &mut Kinematics, dt: f32) {
        kin.acceleration = Vec3::new(0.0, 0.0, -self.gravity);
        kin.position =
            kin.position + kin.velocity * dt + kin.acceleration * (0.5 * dt * dt);
        kin.velocity = kin.velocity + kin.acceleration * dt;

        if kin.position.z <= self.ground_z && kin.velocity.z < 0.0 {
            kin.position.z = self.ground_z;
            kin.velocity = self.launch_velocity;
        }
        kin.angular_velocity = Vec3::ZERO;
    }

    fn preferred_algorithm(&self) -> DrAlgorithm {
        DrAlgorithm::VelocityAndAcceleration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Steps a mover and checks that reported velocity matches the finite
    /// difference of position, so published states stay extrapolable.
    fn assert_velocity_consistent(mover: &mut dyn MotionModel, mut kin: Kinematics) {
        let dt = 0.01;
        // Warm up so position/velocity agree with the path.
        for _ in 0..10 {
            mover.step(&mut kin, dt);
        }
        let before = kin.position;
        mover.step(&mut kin, dt);
        let observed = (kin.position - before) * (1.0 / dt);
        assert!(
            observed.distance(kin.velocity) < kin.velocity.len().max(1.0) * 0.1,
            "finite-difference velocity {observed:?} vs reported {:?}",
            kin.velocity
        );
    }

    #[test]
    fn circuit_velocity_consistent() {
        let mut m = CircuitMover::new(Vec3::ZERO, 10.0, 0.5, 0.0);
        assert_velocity_consistent(&mut m, Kinematics::default());
    }

    #[test]
    fn circuit_stays_on_radius() {
        let mut m = CircuitMover::new(Vec3::new(5.0, 0.0, 2.0), 10.0, 1.0, 0.0);
        let mut kin = Kinematics::default();
        for _ in 0..100 {
            m.step(&mut kin, 0.05);
        }
        let r = kin.position.distance(Vec3::new(5.0, 0.0, 2.0));
        assert!((r - 10.0).abs() < 1e-3);
    }

    #[test]
    fn waypoint_advances_through_corners() {
        let mut m = WaypointMover::new(
            vec![Vec3::new(10.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 0.0)],
            5.0,
        );
        let mut kin = Kinematics::default();
        for _ in 0..1000 {
            m.step(&mut kin, 0.01);
        }
        // After 10 seconds at 5 m/s the mover has covered both legs and
        // wrapped; it must still be within the patrol bounding box.
        assert!(kin.position.x >= -0.1 && kin.position.x <= 10.1);
        assert!(kin.position.y >= -0.1 && kin.position.y <= 10.1);
    }

    #[test]
    fn waypoint_tick_travel_never_exceeds_speed() {
        // The first corner at 1.05 m falls mid-step (0.5 m steps at 5 m/s).
        let mut m = WaypointMover::new(
            vec![
                Vec3::new(1.05, 0.0, 0.0),
                Vec3::new(1.05, 7.0, 0.0),
                Vec3::ZERO,
            ],
            5.0,
        );
        let mut kin = Kinematics::default();
        let dt = 0.1;
        let mut prev = kin.position;
        for _ in 0..200 {
            m.step(&mut kin, dt);
            let moved = kin.position.distance(prev);
            assert!(moved <= 5.0 * dt + 1e-4, "covered {moved} m in one tick");
            prev = kin.position;
        }
    }

    #[test]
    fn ballistic_relaunches_from_ground() {
        let mut m = BallisticMover::new(Vec3::new(0.0, 0.0, 10.0), 0.0);
        let mut kin = Kinematics {
            velocity: Vec3::new(0.0, 0.0, 10.0),
            ..Default::default()
        };
        let mut max_z = 0.0f32;
        for _ in 0..500 {
            m.step(&mut kin, 0.01);
            max_z = max_z.max(kin.position.z);
            assert!(kin.position.z >= -1e-3);
        }
        // Apex of a 10 m/s launch is ~5.1 m.
        assert!(max_z > 4.0 && max_z < 6.0);
    }
}
