//! Signaling-assisted peer connections.
//!
//! [`RoomConnection`] joins a room on the signaling service and drives the
//! `webrtc` crate through the offer/answer/candidate exchange with the
//! other room member. Lifecycle events surface through registered async
//! handlers; the handlers run on this module's own dispatch tasks, so any
//! state they share with the caller must be safe for concurrent access.

pub mod message;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub use message::{IceCandidatePayload, IceServerConfig, SignalMessage};

const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling socket error: {0}")]
    Transport(#[from] WsError),
    #[error("signaling message could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("registration rejected by signaling service: {reason}")]
    Rejected { reason: String },
    #[error("remote client is not present in the room yet")]
    PeerNotPresent,
    #[error("peer negotiation error: {0}")]
    Negotiation(#[from] webrtc::Error),
    #[error("signaling connection closed")]
    Closed,
    #[error("not connected to a signaling room")]
    NotConnected,
}

/// Options for joining a signaling room.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Identifier sent with the register message. Generated per connection
    /// by default.
    pub client_id: String,
    /// ICE servers used for candidate gathering. The accept message may
    /// override these. An empty list restricts gathering to host
    /// candidates.
    pub ice_servers: Vec<IceServerConfig>,
    /// Also gather loopback host candidates. Off by default; the
    /// in-process tests enable it so two peers on one machine can pair
    /// without a routable interface.
    pub include_loopback_candidates: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            ice_servers: vec![IceServerConfig {
                urls: vec![DEFAULT_STUN_URL.to_string()],
                username: None,
                credential: None,
            }],
            include_loopback_candidates: false,
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type OnOpenHandler =
    Box<dyn FnMut(Option<serde_json::Value>) -> HandlerFuture + Send + Sync>;
pub type OnConnectHandler = Box<dyn FnMut() -> HandlerFuture + Send + Sync>;
pub type OnDataChannelHandler =
    Box<dyn FnMut(Arc<RTCDataChannel>) -> HandlerFuture + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SignalSink = SplitSink<WsStream, Message>;
type SignalSender = mpsc::UnboundedSender<SignalMessage>;

/// One signaling-assisted peer connection, scoped to a single room.
pub struct RoomConnection {
    url: String,
    room_id: String,
    options: ConnectOptions,
    peer_present: AtomicBool,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    outbound: Mutex<Option<SignalSender>>,
    open_handler: Mutex<Option<OnOpenHandler>>,
    connect_handler: Mutex<Option<OnConnectHandler>>,
    data_channel_handler: Mutex<Option<OnDataChannelHandler>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoomConnection {
    pub fn new(url: &str, room_id: &str, options: ConnectOptions) -> Self {
        Self {
            url: url.to_string(),
            room_id: room_id.to_string(),
            options,
            peer_present: AtomicBool::new(false),
            pc: Mutex::new(None),
            outbound: Mutex::new(None),
            open_handler: Mutex::new(None),
            connect_handler: Mutex::new(None),
            data_channel_handler: Mutex::new(None),
            writer_task: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    /// Fired once registration is accepted, before any offer goes out.
    pub async fn on_open(&self, handler: OnOpenHandler) {
        *self.open_handler.lock().await = Some(handler);
    }

    /// Fired when the peer connection transport reaches `Connected`.
    pub async fn on_connect(&self, handler: OnConnectHandler) {
        *self.connect_handler.lock().await = Some(handler);
    }

    /// Fired when the remote side announces a data channel.
    pub async fn on_data_channel(&self, handler: OnDataChannelHandler) {
        *self.data_channel_handler.lock().await = Some(handler);
    }

    /// Join the room and start negotiating. Returns after the register/
    /// accept handshake succeeded and the dispatch tasks are running; any
    /// error up to that point aborts the session at the call site.
    pub async fn connect(self: Arc<Self>) -> Result<(), SignalingError> {
        let (ws, _response) = connect_async(&self.url).await?;
        info!(url = %self.url, room = %self.room_id, "signaling socket open");
        let (sink, mut stream) = ws.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        *self.outbound.lock().await = Some(out_tx.clone());
        *self.writer_task.lock().await = Some(tokio::spawn(write_loop(sink, out_rx)));

        out_tx
            .send(SignalMessage::Register {
                room_id: self.room_id.clone(),
                client_id: self.options.client_id.clone(),
            })
            .map_err(|_| SignalingError::Closed)?;

        let (peer_present, ice_servers, metadata) =
            wait_for_accept(&mut stream, &out_tx).await?;
        self.peer_present.store(peer_present, Ordering::SeqCst);

        let ice_servers = match ice_servers {
            Some(servers) if !servers.is_empty() => servers,
            _ => self.options.ice_servers.clone(),
        };
        let pc = Arc::new(
            build_peer_connection(ice_servers, self.options.include_loopback_candidates).await?,
        );
        *self.pc.lock().await = Some(Arc::clone(&pc));

        let candidate_tx = out_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(SignalMessage::Candidate { ice: init.into() });
                    }
                    Err(err) => warn!(%err, "failed to serialize local ice candidate"),
                }
            })
        }));

        let state_conn = Arc::downgrade(&self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state_conn = state_conn.clone();
            Box::pin(async move {
                debug!(%state, "peer connection state changed");
                if state == RTCPeerConnectionState::Connected {
                    if let Some(conn) = state_conn.upgrade() {
                        conn.fire_connect().await;
                    }
                }
            })
        }));

        let channel_conn = Arc::downgrade(&self);
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let channel_conn = channel_conn.clone();
            Box::pin(async move {
                if let Some(conn) = channel_conn.upgrade() {
                    conn.fire_data_channel(channel).await;
                }
            })
        }));

        self.fire_open(metadata).await;

        // The room member that finds a peer already waiting makes the
        // offer; the one that arrived first answers it.
        if peer_present {
            let offer = pc.create_offer(None).await?;
            pc.set_local_description(offer.clone()).await?;
            out_tx
                .send(SignalMessage::Offer { sdp: offer.sdp })
                .map_err(|_| SignalingError::Closed)?;
        }

        let reader_conn = Arc::downgrade(&self);
        *self.reader_task.lock().await =
            Some(tokio::spawn(read_loop(stream, reader_conn, out_tx)));

        Ok(())
    }

    /// Open an outbound data channel. Fails with
    /// [`SignalingError::PeerNotPresent`] while the room has no remote
    /// client; callers treat that as the normal open race, not a failure.
    pub async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<RTCDataChannel>, SignalingError> {
        if !self.peer_present.load(Ordering::SeqCst) {
            return Err(SignalingError::PeerNotPresent);
        }
        let pc = self.peer_connection().await?;
        Ok(pc.create_data_channel(label, None).await?)
    }

    /// Leave the room: say goodbye, close the peer connection, stop the
    /// dispatch tasks.
    pub async fn disconnect(&self) -> Result<(), SignalingError> {
        if let Some(out_tx) = self.outbound.lock().await.take() {
            let _ = out_tx.send(SignalMessage::Bye);
        }
        // The writer exits after draining the farewell and closing the
        // socket; cap the wait in case the socket is wedged.
        if let Some(writer) = self.writer_task.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        if let Some(pc) = self.pc.lock().await.take() {
            pc.close().await?;
        }
        info!(room = %self.room_id, "signaling connection closed");
        Ok(())
    }

    async fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, SignalingError> {
        self.pc
            .lock()
            .await
            .clone()
            .ok_or(SignalingError::NotConnected)
    }

    async fn fire_open(&self, metadata: Option<serde_json::Value>) {
        let mut slot = self.open_handler.lock().await;
        if let Some(handler) = slot.as_mut() {
            handler(metadata).await;
        }
    }

    async fn fire_connect(&self) {
        let mut slot = self.connect_handler.lock().await;
        if let Some(handler) = slot.as_mut() {
            handler().await;
        }
    }

    async fn fire_data_channel(&self, channel: Arc<RTCDataChannel>) {
        let mut slot = self.data_channel_handler.lock().await;
        if let Some(handler) = slot.as_mut() {
            handler(channel).await;
        }
    }

    async fn handle_signal(
        &self,
        message: SignalMessage,
        out_tx: &SignalSender,
    ) -> Result<(), SignalingError> {
        match message {
            SignalMessage::Offer { sdp } => {
                // An inbound offer also proves a remote client is present.
                self.peer_present.store(true, Ordering::SeqCst);
                let pc = self.peer_connection().await?;
                pc.set_remote_description(RTCSessionDescription::offer(sdp)?)
                    .await?;
                let answer = pc.create_answer(None).await?;
                pc.set_local_description(answer.clone()).await?;
                out_tx
                    .send(SignalMessage::Answer { sdp: answer.sdp })
                    .map_err(|_| SignalingError::Closed)?;
            }
            SignalMessage::Answer { sdp } => {
                let pc = self.peer_connection().await?;
                pc.set_remote_description(RTCSessionDescription::answer(sdp)?)
                    .await?;
            }
            SignalMessage::Candidate { ice } => {
                let pc = self.peer_connection().await?;
                pc.add_ice_candidate(ice.into()).await?;
            }
            SignalMessage::Ping => {
                let _ = out_tx.send(SignalMessage::Pong);
            }
            SignalMessage::Pong => {}
            SignalMessage::Bye => {
                info!(room = %self.room_id, "remote client left the room");
            }
            other => {
                debug!(message = ?other, "ignoring signaling message");
            }
        }
        Ok(())
    }
}

async fn write_loop(mut sink: SignalSink, mut out_rx: mpsc::UnboundedReceiver<SignalMessage>) {
    while let Some(message) = out_rx.recv().await {
        let is_farewell = matches!(message, SignalMessage::Bye);
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "failed to encode signaling message");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            return;
        }
        if is_farewell {
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn wait_for_accept(
    stream: &mut SplitStream<WsStream>,
    out_tx: &SignalSender,
) -> Result<(bool, Option<Vec<IceServerConfig>>, Option<serde_json::Value>), SignalingError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<SignalMessage>(&text)? {
                SignalMessage::Accept {
                    connection_id,
                    is_exist_client,
                    ice_servers,
                    authz_metadata,
                } => {
                    debug!(?connection_id, is_exist_client, "registration accepted");
                    return Ok((is_exist_client, ice_servers, authz_metadata));
                }
                SignalMessage::Reject { reason } => {
                    return Err(SignalingError::Rejected {
                        reason: reason.unwrap_or_else(|| "unspecified".to_string()),
                    });
                }
                SignalMessage::Ping => {
                    let _ = out_tx.send(SignalMessage::Pong);
                }
                other => {
                    debug!(message = ?other, "ignoring signaling message before accept");
                }
            },
            Some(Ok(Message::Close(_))) | None => return Err(SignalingError::Closed),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    conn: Weak<RoomConnection>,
    out_tx: SignalSender,
) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(&text) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "undecodable signaling message");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                info!("signaling socket closed by remote");
                return;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, "signaling socket error");
                return;
            }
        };

        let Some(conn) = conn.upgrade() else { return };
        if let Err(err) = conn.handle_signal(message, &out_tx).await {
            warn!(%err, "failed to handle signaling message");
        }
    }
}

async fn build_peer_connection(
    ice_servers: Vec<IceServerConfig>,
    include_loopback_candidates: bool,
) -> Result<RTCPeerConnection, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let mut setting_engine = SettingEngine::default();
    if include_loopback_candidates {
        setting_engine.set_include_loopback_candidate(true);
    }

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    let config = RTCConfiguration {
        ice_servers: ice_servers.into_iter().map(Into::into).collect(),
        ..Default::default()
    };

    api.new_peer_connection(config).await
}
