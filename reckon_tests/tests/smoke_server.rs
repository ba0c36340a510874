use reckon_server::server::bind_ephemeral;

/// Smoke test: server can simulate and publish for a few ticks without
/// panicking, with no clients attached.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    server.exec_console("spawn circuit 2").await?;
    server.exec_console("spawn ballistic 1").await?;
    assert_eq!(server.entity_count(), 3);

    server.run_for_ticks(3).await?;

    // The initial states for all three entities must have been recorded.
    assert!(server.publish_stats().initial >= 3);
    Ok(())
}

/// The publish policy suppresses most ticks: far fewer updates than ticks.
#[tokio::test]
async fn publishing_is_threshold_gated() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(60).await?;
    server.exec_console("spawn circuit 1").await?;

    for _ in 0..60 {
        server.step(1.0 / 60.0).await?;
    }

    let stats = server.publish_stats();
    assert!(stats.published() >= 1);
    assert!(
        stats.published() < 60,
        "expected threshold gating, got {} updates in 60 ticks",
        stats.published()
    );
    Ok(())
}

/// Threshold cvars set through the console take effect on later ticks.
#[tokio::test]
async fn threshold_cvars_apply_live() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(60).await?;
    server.exec_console("spawn circuit 1").await?;
    server.step(1.0 / 60.0).await?;
    let after_initial = server.publish_stats().published();
    assert!(after_initial >= 1);

    // A huge min interval rate-limits everything, an eager heartbeat
    // included: nothing more goes out, but the policy keeps firing.
    server.exec_console("dr_min_interval 1e6").await?;
    server.exec_console("dr_heartbeat 0.1").await?;
    for _ in 0..120 {
        server.step(1.0 / 60.0).await?;
    }
    let stats = server.publish_stats();
    assert_eq!(stats.published(), after_initial);
    assert!(stats.rate_limited > 0, "expected suppressed heartbeats");

    // Zeroed drift limits with no rate limit publish on every moving tick.
    server.exec_console("dr_min_interval 0").await?;
    server.exec_console("dr_max_trans_error 0").await?;
    server.exec_console("dr_max_vel_delta 0").await?;
    for _ in 0..10 {
        server.step(1.0 / 60.0).await?;
    }
    assert!(
        server.publish_stats().published() >= after_initial + 5,
        "lowered thresholds did not take effect"
    );
    Ok(())
}
