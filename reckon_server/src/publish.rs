//! Publish-threshold evaluation.
//!
//! The server does not publish an entity's state every tick. It keeps the
//! last state it put on the wire and, each tick, runs the *same*
//! dead-reckoning extrapolation the remotes run against that state. Only
//! when the remotes' prediction has visibly drifted from ground truth, or a
//! heartbeat is due, does a fresh update go out. The rate limit wins over
//! everything: two updates for one entity are never closer than
//! `min_interval`.

use reckon_shared::{
    config::PublishThresholds,
    dr::{extrapolate, DrAlgorithm, KinematicState},
    ecs::EntityId,
    net::{PublishReason, StateUpdate},
};

/// Per-reason publish counters for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub initial: u64,
    pub heartbeat: u64,
    pub translation: u64,
    pub rotation: u64,
    pub velocity: u64,
    pub forced: u64,
    /// Ticks where a threshold was crossed but the rate limit held the
    /// update back.
    pub rate_limited: u64,
}

impl PublishStats {
    pub fn published(&self) -> u64 {
        self.initial + self.heartbeat + self.translation + self.rotation + self.velocity
            + self.forced
    }

    fn record(&mut self, reason: PublishReason) {
        match reason {
            PublishReason::InitialState => self.initial += 1,
            PublishReason::Heartbeat => self.heartbeat += 1,
            PublishReason::TranslationDrift => self.translation += 1,
            PublishReason::RotationDrift => self.rotation += 1,
            PublishReason::VelocityChange => self.velocity += 1,
            PublishReason::Forced => self.forced += 1,
        }
    }
}

/// Decides when one locally owned entity's state goes on the wire.
#[derive(Debug)]
pub struct UpdatePublisher {
    id: EntityId,
    thresholds: PublishThresholds,
    algorithm: DrAlgorithm,
    last_published: Option<(KinematicState, f64)>,
    next_sequence: u32,
    stats: PublishStats,
}

impl UpdatePublisher {
    pub fn new(id: EntityId, thresholds: PublishThresholds, algorithm: DrAlgorithm) -> Self {
        Self {
            id,
            thresholds,
            algorithm,
            last_published: None,
            next_sequence: 0,
            stats: PublishStats::default(),
        }
    }

    pub fn algorithm(&self) -> DrAlgorithm {
        self.algorithm
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Applies new thresholds (console tuning takes effect mid-session).
    pub fn set_thresholds(&mut self, thresholds: PublishThresholds) {
        self.thresholds = thresholds;
    }

    /// Decides whether `actual` warrants an update at sim time `now`.
    ///
    /// A `Some` result must be followed by [`mark_published`] with the same
    /// state and time, otherwise the next evaluation repeats the decision.
    ///
    /// [`mark_published`]: UpdatePublisher::mark_published
    pub fn evaluate(&mut self, actual: &KinematicState, now: f64) -> Option<PublishReason> {
        let Some((published, published_at)) = &self.last_published else {
            return Some(PublishReason::InitialState);
        };

        let elapsed = (now - published_at) as f32;
        let reason = self.drift_reason(published, actual, elapsed)?;

        if elapsed < self.thresholds.min_interval {
            self.stats.rate_limited += 1;
            return None;
        }
        Some(reason)
    }

    fn drift_reason(
        &self,
        published: &KinematicState,
        actual: &KinematicState,
        elapsed: f32,
    ) -> Option<PublishReason> {
        if elapsed >= self.thresholds.heartbeat {
            return Some(PublishReason::Heartbeat);
        }

        // Mirror of what remotes currently display.
        let predicted = extrapolate(published, self.algorithm, elapsed);

        if predicted.position.distance(actual.position) > self.thresholds.max_translation_error {
            return Some(PublishReason::TranslationDrift);
        }

        let max_rot = self.thresholds.max_rotation_error_deg.to_radians();
        if predicted.rotation.angle_to(actual.rotation) > max_rot {
            return Some(PublishReason::RotationDrift);
        }

        if (actual.velocity - published.velocity).len() > self.thresholds.max_velocity_delta {
            return Some(PublishReason::VelocityChange);
        }

        None
    }

    /// Records a publication and builds the wire message.
    pub fn mark_published(
        &mut self,
        state: &KinematicState,
        now: f64,
        reason: PublishReason,
    ) -> StateUpdate {
        self.last_published = Some((*state, now));
        self.stats.record(reason);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        StateUpdate {
            id: self.id,
            sequence,
            sim_time: now,
            reason,
            state: *state,
        }
    }
}
