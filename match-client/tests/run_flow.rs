use std::time::Duration;

use match_client::{run, Config};
use peer_net::testing::{spawn_pairing_matchmaking, SignalingRelay};
use peer_net::{shutdown, telemetry};
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pairs_two_clients_into_one_room_and_shuts_down_cleanly() {
    telemetry::init("run-flow-test");

    let (mm_url, _mm_server) = spawn_pairing_matchmaking().await;
    let relay = SignalingRelay::spawn().await;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let (matched_tx_a, matched_rx_a) = oneshot::channel();
    let (matched_tx_b, matched_rx_b) = oneshot::channel();

    let config_a = Config {
        matchmaking_url: mm_url.clone(),
        signaling_url: relay.url.clone(),
        matched_tx: Some(matched_tx_a),
    };
    let config_b = Config {
        matchmaking_url: mm_url,
        signaling_url: relay.url.clone(),
        matched_tx: Some(matched_tx_b),
    };

    let client_a = tokio::spawn(run(config_a, shutdown_rx.clone()));
    let client_b = tokio::spawn(run(config_b, shutdown_rx));

    let matched_a = timeout(Duration::from_secs(10), matched_rx_a)
        .await
        .expect("first client matched in time")
        .expect("match hook");
    let matched_b = timeout(Duration::from_secs(10), matched_rx_b)
        .await
        .expect("second client matched in time")
        .expect("match hook");

    assert_eq!(matched_a.room_id, matched_b.room_id);
    assert_ne!(matched_a.user_id, matched_b.user_id);

    // Give both sessions a moment on the wire before pulling the plug.
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown::trigger(&shutdown_tx);

    timeout(Duration::from_secs(10), client_a)
        .await
        .expect("first client exits in time")
        .expect("join")
        .expect("clean run");
    timeout(Duration::from_secs(10), client_b)
        .await
        .expect("second client exits in time")
        .expect("join")
        .expect("clean run");

    relay.shutdown();
}
