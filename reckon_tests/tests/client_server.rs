//! Full socket-based integration tests for client ↔ server communication.

use std::time::Duration;

use reckon_client::TrackingClient;
use reckon_server::server::bind_ephemeral;
use reckon_shared::net::{decode_from_bytes, encode_to_bytes, ClientId, NetMsg, PROTOCOL_VERSION};

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let udp_hello = NetMsg::UdpHello {
        client_udp_port: 50000,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&udp_hello)?)?, udp_hello);

    let ready = NetMsg::ClientReady {
        client_id: ClientId(1),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&ready)?)?, ready);

    Ok(())
}

/// Full integration: spawn server with entities, connect client, receive
/// spawns over TCP and threshold-gated state updates over UDP.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    // Bind server to ephemeral port and populate the world.
    let (mut server, server_cfg) = bind_ephemeral(64).await?;
    server.exec_console("spawn circuit 2").await?;

    // Spawn server accept + step loop in background.
    let server_handle = tokio::spawn(async move {
        // Accept one client.
        let _cid = server.accept_one().await?;
        // Run enough ticks to get past the initial updates.
        for _ in 0..40 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, anyhow::Error>(server.publish_stats())
    });

    // Give server a moment to start listening.
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Connect client; the handshake replays both entity spawns.
    let mut client = TrackingClient::connect(&server_cfg).await?;
    client.send_ready().await?;

    for _ in 0..40 {
        client.poll_reliable().await?;
        client.recv_updates().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = server_handle.await??;

    assert_eq!(client.tracker.len(), 2, "expected both entities tracked");
    assert!(stats.published() >= 2, "expected initial states published");

    // The tracker must produce a pose for every entity.
    let poses = client.tracker.poses(client.now());
    assert_eq!(poses.len(), 2);

    Ok(())
}

/// Two connected clients are listed by `status` in ascending id order.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_lists_clients_in_stable_order() -> anyhow::Result<()> {
    let (mut server, cfg) = bind_ephemeral(64).await?;

    let cfg_a = cfg.clone();
    let join_a = tokio::spawn(async move { TrackingClient::connect(&cfg_a).await });
    server.accept_one().await?;
    let _client_a = join_a.await??;

    let cfg_b = cfg.clone();
    let join_b = tokio::spawn(async move { TrackingClient::connect(&cfg_b).await });
    server.accept_one().await?;
    let _client_b = join_b.await??;

    let out = server.exec_console("status").await?;
    let ids: Vec<u32> = out
        .iter()
        .filter(|line| line.contains("udp="))
        .map(|line| {
            let start = line.find("ClientId(").unwrap() + "ClientId(".len();
            let end = line[start..].find(')').unwrap() + start;
            line[start..end].parse().unwrap()
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1], "client listing out of order: {ids:?}");
    Ok(())
}
