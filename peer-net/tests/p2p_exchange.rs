//! Two clients matched into one room negotiate a real data channel through
//! the in-process signaling relay and exchange one greeting each way.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use peer_net::matchmaking::{MatchRequest, MatchmakingClient};
use peer_net::signaling::{ConnectOptions, RoomConnection, SignalingError};
use peer_net::testing::{spawn_pairing_matchmaking, SignalingRelay};
use peer_net::{identity, telemetry};
use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

const EXCHANGE_DEADLINE: Duration = Duration::from_secs(30);

/// Host candidates only, loopback included, so two peers inside one test
/// process can pair without a routable interface or a STUN round trip.
fn offline_options() -> ConnectOptions {
    ConnectOptions {
        ice_servers: Vec::new(),
        include_loopback_candidates: true,
        ..ConnectOptions::default()
    }
}

struct Peer {
    user_id: String,
    matched_peer: String,
    conn: Arc<RoomConnection>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Send one greeting once the channel opens and forward every inbound text
/// frame to the test body.
fn wire_channel(
    channel: Arc<RTCDataChannel>,
    user_id: String,
    inbound_tx: mpsc::UnboundedSender<String>,
) {
    let sender = Arc::clone(&channel);
    channel.on_open(Box::new(move || {
        let sender = Arc::clone(&sender);
        let user_id = user_id.clone();
        Box::pin(async move {
            sender
                .send_text(format!("Message to {user_id}"))
                .await
                .expect("send greeting");
        })
    }));

    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let inbound_tx = inbound_tx.clone();
        Box::pin(async move {
            if !message.is_string {
                return;
            }
            if let Ok(text) = String::from_utf8(message.data.to_vec()) {
                let _ = inbound_tx.send(text);
            }
        })
    }));
}

async fn join_room(mm_url: &str, signaling_url: &str) -> Peer {
    let now = Utc::now();
    let user_id = identity::short_user_id(now);

    let mut mm = MatchmakingClient::connect(mm_url)
        .await
        .expect("matchmaking connect");
    mm.submit(&MatchRequest {
        user_id: user_id.clone(),
        created_at: now,
    })
    .await
    .expect("submit join request");
    let matched = mm.wait_for_match().await.expect("match");

    let conn = Arc::new(RoomConnection::new(
        signaling_url,
        &matched.room_id,
        offline_options(),
    ));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let open_conn = Arc::downgrade(&conn);
    let open_user = user_id.clone();
    let open_tx = inbound_tx.clone();
    conn.on_open(Box::new(move |_metadata| {
        let open_conn = open_conn.clone();
        let user_id = open_user.clone();
        let inbound_tx = open_tx.clone();
        Box::pin(async move {
            let Some(conn) = open_conn.upgrade() else { return };
            match conn.create_data_channel("match-making-example").await {
                Ok(channel) => wire_channel(channel, user_id, inbound_tx),
                Err(SignalingError::PeerNotPresent) => {}
                Err(err) => panic!("create data channel: {err}"),
            }
        })
    }))
    .await;

    let channel_user = user_id.clone();
    conn.on_data_channel(Box::new(move |channel| {
        let user_id = channel_user.clone();
        let inbound_tx = inbound_tx.clone();
        Box::pin(async move {
            wire_channel(channel, user_id, inbound_tx);
        })
    }))
    .await;

    Arc::clone(&conn).connect().await.expect("signaling connect");

    Peer {
        user_id,
        matched_peer: matched.user_id,
        conn,
        inbound: inbound_rx,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn matched_peers_exchange_messages_over_a_data_channel() {
    telemetry::init("p2p-test");

    let (mm_url, _mm_server) = spawn_pairing_matchmaking().await;
    let relay = SignalingRelay::spawn().await;

    let (mut first, mut second) =
        tokio::join!(join_room(&mm_url, &relay.url), join_room(&mm_url, &relay.url));

    // Each MATCH response carries the other side's id.
    assert_eq!(first.matched_peer, second.user_id);
    assert_eq!(second.matched_peer, first.user_id);

    let from_second = timeout(EXCHANGE_DEADLINE, first.inbound.recv())
        .await
        .expect("first peer hears from second in time")
        .expect("inbound channel open");
    assert_eq!(from_second, format!("Message to {}", second.user_id));

    let from_first = timeout(EXCHANGE_DEADLINE, second.inbound.recv())
        .await
        .expect("second peer hears from first in time")
        .expect("inbound channel open");
    assert_eq!(from_first, format!("Message to {}", first.user_id));

    first.conn.disconnect().await.expect("disconnect");
    second.conn.disconnect().await.expect("disconnect");
    relay.shutdown();
}
