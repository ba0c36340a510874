//! Headless drift scenario runner.
//!
//! Runs the publisher → lossy channel → reckoner loop (no sockets) for a
//! configurable duration and loss rate, then prints publish and error
//! statistics. Useful for eyeballing threshold/smoothing tuning before
//! touching cvars on a live server.
//!
//! Usage:
//!   cargo run -p reckon_tests --bin drift_runner -- [--seconds 30] [--loss 0.2] [--seed 7]

use rand::{rngs::StdRng, Rng, SeedableRng};
use reckon_client::reckoner::DeadReckoner;
use reckon_server::mover::{CircuitMover, MotionModel};
use reckon_server::publish::UpdatePublisher;
use reckon_shared::{
    config::PublishThresholds,
    dr::DrAlgorithm,
    ecs::{EntityId, Kinematics},
    math::Vec3,
    smoothing::SmoothingConfig,
};

struct Args {
    seconds: f64,
    loss: f64,
    seed: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        seconds: 30.0,
        loss: 0.2,
        seed: 7,
    };
    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--seconds" if i + 1 < argv.len() => {
                args.seconds = argv[i + 1].parse().unwrap_or(args.seconds);
                i += 2;
            }
            "--loss" if i + 1 < argv.len() => {
                args.loss = argv[i + 1].parse().unwrap_or(args.loss);
                i += 2;
            }
            "--seed" if i + 1 < argv.len() => {
                args.seed = argv[i + 1].parse().unwrap_or(args.seed);
                i += 2;
            }
            _ => i += 1,
        }
    }
    args
}

fn main() {
    let args = parse_args();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let algorithm = DrAlgorithm::VelocityAndAcceleration;
    let thresholds = PublishThresholds::default();
    let mut publisher = UpdatePublisher::new(EntityId(1), thresholds, algorithm);
    let mut mover = CircuitMover::new(Vec3::ZERO, 10.0, 0.5, 0.0);
    let mut kin = Kinematics::default();
    mover.step(&mut kin, 0.0);

    let mut reckoner = DeadReckoner::new(algorithm, SmoothingConfig::default(), kin.state(), 0.0);

    let dt = 1.0 / 30.0f32;
    let ticks = (args.seconds / dt as f64) as u64;

    let mut delivered = 0u64;
    let mut dropped = 0u64;
    let mut max_error = 0.0f32;
    let mut error_sum = 0.0f64;
    let mut samples = 0u64;

    for tick in 1..=ticks {
        let now = tick as f64 * dt as f64;
        mover.step(&mut kin, dt);

        if let Some(reason) = publisher.evaluate(&kin.state(), now) {
            let update = publisher.mark_published(&kin.state(), now, reason);
            if rng.gen_bool(args.loss) {
                dropped += 1;
            } else {
                reckoner.apply_update(&update, now);
                delivered += 1;
            }
        }

        if delivered > 0 {
            let error = reckoner.pose_at(now).position.distance(kin.position);
            max_error = max_error.max(error);
            error_sum += error as f64;
            samples += 1;
        }
    }

    let stats = publisher.stats();
    println!("Drift run: {:.1}s at {:.0} Hz, {:.0}% loss (seed {})",
        args.seconds, 1.0 / dt, args.loss * 100.0, args.seed);
    println!("Published: {} (initial {}, heartbeat {}, trans {}, rot {}, vel {})",
        stats.published(), stats.initial, stats.heartbeat, stats.translation,
        stats.rotation, stats.velocity);
    println!("Rate-limited ticks: {}", stats.rate_limited);
    println!("Delivered: {}  Dropped: {}", delivered, dropped);
    if samples > 0 {
        println!("Displayed error: mean {:.3} m, max {:.3} m",
            error_sum / samples as f64, max_error);
    }
}
