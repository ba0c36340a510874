//! Per-entity dead reckoning.
//!
//! Between updates the displayed pose is extrapolated from the last accepted
//! ground truth. When a new update lands, the pose the viewer was showing at
//! that instant becomes the start of a blend toward the (still advancing)
//! new extrapolation, played out over the smoothing window. Stale or
//! reordered updates are rejected by sequence number.
//!
//! Time is the receiver's own clock: extrapolation runs from the moment the
//! update arrived locally. There is no clock synchronization with the
//! sender.

use reckon_shared::{
    dr::{extrapolate, DrAlgorithm, KinematicState, Pose},
    net::StateUpdate,
    smoothing::{smoothing_window, SmoothingConfig, UpdateIntervalTracker},
};

/// What happened to an incoming update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Sequence was stale; update discarded.
    Rejected,
    /// Update accepted. `window` is the smoothing window in seconds
    /// (0 means the pose snapped); `teleported` marks a snap caused by the
    /// teleport distance rather than a negligible error.
    Applied { window: f32, teleported: bool },
}

/// Dead-reckoning state for one remote entity.
#[derive(Debug)]
pub struct DeadReckoner {
    algorithm: DrAlgorithm,
    cfg: SmoothingConfig,

    truth: KinematicState,
    /// Local time the current truth arrived, seconds.
    arrived_at: f64,
    last_sequence: Option<u32>,
    intervals: UpdateIntervalTracker,

    /// Pose shown when the current truth arrived; blend origin.
    blend_from: Option<Pose>,
    blend_started_at: f64,
    window: f32,
}

impl DeadReckoner {
    /// Starts tracking from the spawn-time state.
    pub fn new(algorithm: DrAlgorithm, cfg: SmoothingConfig, initial: KinematicState, now: f64) -> Self {
        Self {
            algorithm,
            intervals: UpdateIntervalTracker::new(cfg.interval_history),
            cfg,
            truth: initial,
            arrived_at: now,
            last_sequence: None,
            blend_from: None,
            blend_started_at: now,
            window: 0.0,
        }
    }

    pub fn algorithm(&self) -> DrAlgorithm {
        self.algorithm
    }

    pub fn last_state(&self) -> &KinematicState {
        &self.truth
    }

    pub fn set_smoothing(&mut self, cfg: SmoothingConfig) {
        self.cfg = cfg;
    }

    /// Feeds in a received update at local time `now`.
    pub fn apply_update(&mut self, update: &StateUpdate, now: f64) -> UpdateOutcome {
        if let Some(last) = self.last_sequence {
            if update.sequence <= last {
                return UpdateOutcome::Rejected;
            }
        }

        // Capture what the viewer is showing right now, before the truth moves.
        let displayed = self.pose_at(now);
        let error = displayed.position.distance(update.state.position);
        let teleported = error >= self.cfg.teleport_distance;

        self.intervals.observe(now);
        let window = if self.algorithm == DrAlgorithm::None {
            0.0
        } else {
            smoothing_window(
                &self.cfg,
                self.intervals.average(),
                error,
                update.state.velocity.len(),
            )
        };

        self.truth = update.state;
        self.arrived_at = now;
        self.last_sequence = Some(update.sequence);
        self.window = window;
        self.blend_from = if window > 0.0 { Some(displayed) } else { None };
        self.blend_started_at = now;

        UpdateOutcome::Applied { window, teleported }
    }

    /// The pose to display at local time `now`.
    pub fn pose_at(&self, now: f64) -> Pose {
        if self.algorithm == DrAlgorithm::None {
            return self.truth.pose();
        }

        let target = extrapolate(&self.truth, self.algorithm, (now - self.arrived_at) as f32);

        let Some(from) = self.blend_from else {
            return target;
        };
        if self.window <= 0.0 {
            return target;
        }

        let alpha = ((now - self.blend_started_at) as f32 / self.window).clamp(0.0, 1.0);
        if alpha >= 1.0 {
            return target;
        }
        Pose {
            position: from.position.lerp(target.position, alpha),
            rotation: from.rotation.slerp(target.rotation, alpha),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_shared::{ecs::EntityId, math::Vec3, net::PublishReason};

    fn update(sequence: u32, state: KinematicState) -> StateUpdate {
        StateUpdate {
            id: EntityId(1),
            sequence,
            sim_time: 0.0,
            reason: PublishReason::Heartbeat,
            state,
        }
    }

    fn reckoner(algorithm: DrAlgorithm) -> DeadReckoner {
        DeadReckoner::new(algorithm, SmoothingConfig::default(), KinematicState::default(), 0.0)
    }

    #[test]
    fn extrapolates_between_updates() {
        let mut r = reckoner(DrAlgorithm::VelocityOnly);
        let state = KinematicState {
            velocity: Vec3::new(2.0, 0.0, 0.0),
            ..Default::default()
        };
        r.apply_update(&update(0, state), 1.0);

        // Half a second later the entity should have moved ~1 m.
        let pose = r.pose_at(1.5);
        assert!((pose.position.x - 1.0).abs() < 0.05);
    }

    #[test]
    fn stale_sequence_is_rejected() {
        let mut r = reckoner(DrAlgorithm::VelocityOnly);
        let a = KinematicState::default();
        let b = KinematicState {
            position: Vec3::new(5.0, 0.0, 0.0),
            ..Default::default()
        };
        assert!(matches!(
            r.apply_update(&update(3, a), 1.0),
            UpdateOutcome::Applied { .. }
        ));
        assert_eq!(r.apply_update(&update(3, b), 1.1), UpdateOutcome::Rejected);
        assert_eq!(r.apply_update(&update(2, b), 1.2), UpdateOutcome::Rejected);
        // The rejected position must not leak into the displayed pose.
        assert!(r.pose_at(1.3).position.x.abs() < 1e-3);
    }

    #[test]
    fn correction_smooths_then_converges() {
        let mut r = reckoner(DrAlgorithm::VelocityOnly);
        r.apply_update(&update(0, KinematicState::default()), 0.0);
        r.apply_update(&update(1, KinematicState::default()), 0.2);

        // Ground truth jumped 1 m sideways, stationary.
        let corrected = KinematicState {
            position: Vec3::new(0.0, 1.0, 0.0),
            ..Default::default()
        };
        let outcome = r.apply_update(&update(2, corrected), 0.4);
        let UpdateOutcome::Applied { window, teleported } = outcome else {
            panic!("update rejected");
        };
        assert!(!teleported);
        assert!(window > 0.0);

        // Mid-window the pose is strictly between old and new.
        let mid = r.pose_at(0.4 + window as f64 * 0.5);
        assert!(mid.position.y > 0.05 && mid.position.y < 0.95);

        // Past the window the pose sits on the new truth.
        let settled = r.pose_at(0.4 + window as f64 + 0.01);
        assert!((settled.position.y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn teleport_snaps_immediately() {
        let mut r = reckoner(DrAlgorithm::VelocityOnly);
        r.apply_update(&update(0, KinematicState::default()), 0.0);

        let far = KinematicState {
            position: Vec3::new(100.0, 0.0, 0.0),
            ..Default::default()
        };
        let outcome = r.apply_update(&update(1, far), 0.5);
        assert_eq!(
            outcome,
            UpdateOutcome::Applied {
                window: 0.0,
                teleported: true
            }
        );
        assert!((r.pose_at(0.5).position.x - 100.0).abs() < 1e-3);
    }

    #[test]
    fn none_algorithm_shows_raw_state() {
        let mut r = reckoner(DrAlgorithm::None);
        let state = KinematicState {
            position: Vec3::new(3.0, 0.0, 0.0),
            velocity: Vec3::new(100.0, 0.0, 0.0),
            ..Default::default()
        };
        r.apply_update(&update(0, state), 0.0);
        // No extrapolation, no blending: the raw position, even much later.
        let pose = r.pose_at(10.0);
        assert_eq!(pose.position, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn acceleration_extrapolation_tracks_ballistic_truth() {
        let mut r = reckoner(DrAlgorithm::VelocityAndAcceleration);
        let state = KinematicState {
            velocity: Vec3::new(0.0, 0.0, 10.0),
            acceleration: Vec3::new(0.0, 0.0, -9.81),
            ..Default::default()
        };
        r.apply_update(&update(0, state), 0.0);

        let pose = r.pose_at(1.0);
        let expected = 10.0 - 0.5 * 9.81;
        assert!((pose.position.z - expected).abs() < 1e-2);
    }
}
