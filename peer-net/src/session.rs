//! Peer session controller: owns the data channel for one matched room and
//! keeps the periodic sender and message logger running on it until the
//! process shuts down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::shutdown::{self, ShutdownReceiver};
use crate::signaling::{ConnectOptions, RoomConnection, SignalingError};

/// Label for the channel this application opens.
pub const DATA_CHANNEL_LABEL: &str = "match-making-example";

/// Cadence of the periodic sender.
pub const SEND_INTERVAL: Duration = Duration::from_secs(2);

/// Single-assignment cell for the session's data channel. Two callback
/// paths can produce a channel (outbound creation on open, inbound receipt
/// from the remote) and both run on the signaling dispatch tasks, so the
/// first writer wins and the second is refused.
#[derive(Default)]
pub struct ChannelSlot {
    inner: Mutex<Option<Arc<RTCDataChannel>>>,
}

impl ChannelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare-and-set: stores the channel only when none is held yet.
    /// Returns whether this call won the slot.
    pub fn set_if_empty(&self, channel: Arc<RTCDataChannel>) -> bool {
        let mut guard = self.inner.lock().expect("channel slot lock");
        if guard.is_some() {
            return false;
        }
        *guard = Some(channel);
        true
    }

    pub fn get(&self) -> Option<Arc<RTCDataChannel>> {
        self.inner.lock().expect("channel slot lock").clone()
    }
}

/// Establish the peer-to-peer session for a matched room and run it until
/// the shutdown signal fires, then disconnect. A failure to initiate the
/// signaling handshake is returned (fatal for the caller); negotiation
/// errors after that only surface in the log.
pub async fn run(
    signaling_url: &str,
    room_id: &str,
    user_id: &str,
    shutdown_rx: ShutdownReceiver,
) -> Result<(), SignalingError> {
    let conn = Arc::new(RoomConnection::new(
        signaling_url,
        room_id,
        ConnectOptions::default(),
    ));
    let slot = Arc::new(ChannelSlot::new());

    let open_conn = Arc::downgrade(&conn);
    let open_slot = Arc::clone(&slot);
    let open_user = user_id.to_string();
    let open_shutdown = shutdown_rx.clone();
    conn.on_open(Box::new(move |_metadata| {
        let open_conn = open_conn.clone();
        let slot = Arc::clone(&open_slot);
        let user_id = open_user.clone();
        let shutdown_rx = open_shutdown.clone();
        Box::pin(async move {
            let Some(conn) = open_conn.upgrade() else { return };
            match conn.create_data_channel(DATA_CHANNEL_LABEL).await {
                Ok(channel) => {
                    info!(label = channel.label(), "data channel created");
                    adopt_channel(&slot, channel, &user_id, shutdown_rx);
                }
                Err(SignalingError::PeerNotPresent) => {
                    // Normal race: we arrived first; the remote's offer
                    // will carry the channel instead.
                    debug!("no remote client in the room yet");
                }
                Err(err) => {
                    warn!(%err, "data channel creation failed");
                }
            }
        })
    }))
    .await;

    conn.on_connect(Box::new(move || {
        Box::pin(async move {
            info!("peer connection established");
        })
    }))
    .await;

    let recv_slot = Arc::clone(&slot);
    let recv_user = user_id.to_string();
    let recv_shutdown = shutdown_rx.clone();
    conn.on_data_channel(Box::new(move |channel| {
        let slot = Arc::clone(&recv_slot);
        let user_id = recv_user.clone();
        let shutdown_rx = recv_shutdown.clone();
        Box::pin(async move {
            info!(label = channel.label(), "data channel received");
            adopt_channel(&slot, channel, &user_id, shutdown_rx);
        })
    }))
    .await;

    Arc::clone(&conn).connect().await?;
    info!(room = %room_id, "peer session running");

    shutdown::wait(shutdown_rx).await;
    conn.disconnect().await
}

/// Hand a freshly produced channel to the slot. The winning path starts
/// the send/receive tasks exactly once; a losing channel is dropped
/// untouched so the held reference is never overwritten.
fn adopt_channel(
    slot: &ChannelSlot,
    channel: Arc<RTCDataChannel>,
    user_id: &str,
    shutdown_rx: ShutdownReceiver,
) {
    if !slot.set_if_empty(Arc::clone(&channel)) {
        debug!(
            label = channel.label(),
            "already holding a data channel, ignoring"
        );
        return;
    }
    attach_message_logger(&channel);
    spawn_periodic_sender(channel, user_id.to_string(), shutdown_rx);
}

/// Send `Message to {user_id}` on every tick until shutdown. Send failures
/// (channel not open yet, or mid-teardown) are logged and the ticking
/// continues; there is no backoff and no delivery confirmation.
pub fn spawn_periodic_sender(
    channel: Arc<RTCDataChannel>,
    user_id: String,
    shutdown_rx: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SEND_INTERVAL);
        // interval yields immediately on the first tick; consume it so a
        // full interval elapses before the first send
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown::wait(shutdown_rx.clone()) => break,
                _ = ticker.tick() => {
                    let message = format!("Message to {user_id}");
                    match channel.send_text(message.clone()).await {
                        Ok(_) => info!(label = channel.label(), %message, "data channel send"),
                        Err(err) => debug!(label = channel.label(), %err, "data channel send failed"),
                    }
                }
            }
        }
    })
}

/// Log every textual inbound message with the channel label. Non-text
/// payloads are ignored.
pub fn attach_message_logger(channel: &Arc<RTCDataChannel>) {
    let label = channel.label().to_string();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let label = label.clone();
        Box::pin(async move {
            if !message.is_string {
                return;
            }
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => info!(label = %label, %text, "data channel recv"),
                Err(err) => debug!(label = %label, %err, "discarding malformed text frame"),
            }
        })
    }));
}
