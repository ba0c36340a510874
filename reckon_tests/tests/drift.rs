//! In-memory publisher → lossy channel → reckoner loop.
//!
//! No sockets: the server-side publisher and client-side reckoner are wired
//! directly, with deterministic packet loss in between, to check that the
//! displayed pose stays within a sane bound of ground truth and that stale
//! deliveries are rejected.

use reckon_client::reckoner::{DeadReckoner, UpdateOutcome};
use reckon_server::mover::{CircuitMover, MotionModel};
use reckon_server::publish::UpdatePublisher;
use reckon_shared::{
    config::PublishThresholds,
    dr::DrAlgorithm,
    ecs::{EntityId, Kinematics},
    math::Vec3,
    smoothing::SmoothingConfig,
};

#[test]
fn lossy_channel_keeps_error_bounded() {
    let algorithm = DrAlgorithm::VelocityAndAcceleration;
    let mut publisher =
        UpdatePublisher::new(EntityId(1), PublishThresholds::default(), algorithm);
    let mut mover = CircuitMover::new(Vec3::ZERO, 10.0, 0.5, 0.0);
    let mut kin = Kinematics::default();
    mover.step(&mut kin, 0.0);

    let mut reckoner = DeadReckoner::new(algorithm, SmoothingConfig::default(), kin.state(), 0.0);

    let dt = 1.0 / 30.0;
    let mut published = 0u32;
    let mut delivered = 0u32;
    let mut max_error = 0.0f32;

    for tick in 1..=450 {
        let now = tick as f64 * dt as f64;
        mover.step(&mut kin, dt);

        if let Some(reason) = publisher.evaluate(&kin.state(), now) {
            let update = publisher.mark_published(&kin.state(), now, reason);
            published += 1;
            // Drop every fourth update on the floor.
            if update.sequence % 4 != 3 {
                let outcome = reckoner.apply_update(&update, now);
                assert!(matches!(outcome, UpdateOutcome::Applied { .. }));
                delivered += 1;
            }
        }

        if delivered > 0 {
            let error = reckoner.pose_at(now).position.distance(kin.position);
            max_error = max_error.max(error);
        }
    }

    assert!(published >= 5, "circuit motion should force publishes");
    assert!(
        published < 450,
        "every tick published defeats the threshold policy"
    );
    assert!(delivered > 0);
    // A quarter of the updates were lost; the displayed pose may drift well
    // past the publish threshold, but never unboundedly.
    assert!(
        max_error < 6.0,
        "displayed error grew to {max_error} m under 25% loss"
    );
}

#[test]
fn reordered_delivery_is_dropped() {
    let algorithm = DrAlgorithm::VelocityOnly;
    let mut publisher =
        UpdatePublisher::new(EntityId(1), PublishThresholds::default(), algorithm);
    let mut mover = CircuitMover::new(Vec3::ZERO, 5.0, 1.0, 0.0);
    let mut kin = Kinematics::default();
    mover.step(&mut kin, 0.0);

    let mut reckoner = DeadReckoner::new(algorithm, SmoothingConfig::default(), kin.state(), 0.0);

    // Produce a handful of updates by brute force.
    let mut updates = Vec::new();
    for tick in 1..=300 {
        let now = tick as f64 / 30.0;
        mover.step(&mut kin, 1.0 / 30.0);
        if let Some(reason) = publisher.evaluate(&kin.state(), now) {
            updates.push((publisher.mark_published(&kin.state(), now, reason), now));
        }
    }
    assert!(updates.len() >= 3, "need at least three updates to reorder");

    // Deliver in order, then replay an old one.
    let mut now = 0.0;
    for (update, sent_at) in &updates {
        now = sent_at + 0.01;
        assert!(matches!(
            reckoner.apply_update(update, now),
            UpdateOutcome::Applied { .. }
        ));
    }
    let (old, _) = &updates[0];
    assert_eq!(reckoner.apply_update(old, now + 0.1), UpdateOutcome::Rejected);

    // The displayed pose still follows the newest truth, not the replay.
    let (newest, _) = updates.last().unwrap();
    let pose = reckoner.pose_at(now + 0.2);
    assert!(pose.position.distance(newest.state.position) < 2.0);
}
