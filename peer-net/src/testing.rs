//! In-process stand-ins for the external matchmaking and signaling
//! services, used by the integration tests across the workspace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Matchmaking stub serving a single client: reads its join request, plays
/// back the given frames verbatim, then keeps the socket open until the
/// client goes away.
pub async fn spawn_scripted_matchmaking(frames: Vec<String>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}/", listener.local_addr().expect("local addr"));

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("accept ws");

        let request = ws.next().await.expect("join request").expect("join request frame");
        let request: serde_json::Value =
            serde_json::from_str(request.to_text().expect("text frame")).expect("request json");
        assert!(request["user_id"].is_string(), "join request must carry user_id");
        assert!(
            request["created_at"].is_string(),
            "join request must carry created_at"
        );

        for frame in frames {
            ws.send(Message::Text(frame)).await.expect("send frame");
        }

        while let Some(Ok(_)) = ws.next().await {}
    });

    (url, handle)
}

/// Matchmaking stub pairing its first two clients into one freshly minted
/// room: each side receives a MATCH response carrying the other side's
/// user id.
pub async fn spawn_pairing_matchmaking() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}/", listener.local_addr().expect("local addr"));

    let handle = tokio::spawn(async move {
        let mut sockets = Vec::new();
        let mut user_ids = Vec::new();

        for _ in 0..2 {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(tcp).await.expect("accept ws");
            let frame = ws.next().await.expect("join request").expect("join request frame");
            let request: serde_json::Value =
                serde_json::from_str(frame.to_text().expect("text frame")).expect("request json");
            let user_id = request["user_id"].as_str().expect("user_id").to_string();
            user_ids.push(user_id);
            sockets.push(ws);
        }

        let room_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        for (index, ws) in sockets.iter_mut().enumerate() {
            let response = serde_json::json!({
                "type": "MATCH",
                "room_id": room_id,
                "user_id": user_ids[1 - index],
                "created_at": now,
            });
            ws.send(Message::Text(response.to_string()))
                .await
                .expect("send match");
        }

        for mut ws in sockets {
            tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
        }
    });

    (url, handle)
}

type RoomMap = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>>;

/// Minimal signaling relay for two-client rooms: answers `register` with
/// `accept` (reporting whether the room already had a member) and forwards
/// offer/answer/candidate/bye frames to the other room member.
pub struct SignalingRelay {
    pub url: String,
    handle: JoinHandle<()>,
}

impl SignalingRelay {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/signaling", listener.local_addr().expect("local addr"));
        let rooms: RoomMap = Arc::new(Mutex::new(HashMap::new()));

        let handle = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(relay_client(tcp, Arc::clone(&rooms)));
            }
        });

        Self { url, handle }
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn relay_client(tcp: TcpStream, rooms: RoomMap) {
    let ws = match accept_async(tcp).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut membership: Option<(String, usize)> = None;
    while let Some(Ok(frame)) = stream.next().await {
        let Message::Text(text) = frame else { continue };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };

        match value["type"].as_str() {
            Some("register") => {
                let room_id = value["roomId"].as_str().unwrap_or_default().to_string();
                let mut map = rooms.lock().expect("room map lock");
                let members = map.entry(room_id.clone()).or_default();
                let accept = serde_json::json!({
                    "type": "accept",
                    "isExistClient": !members.is_empty(),
                });
                members.push(tx.clone());
                membership = Some((room_id, members.len() - 1));
                let _ = tx.send(Message::Text(accept.to_string()));
            }
            Some("offer" | "answer" | "candidate" | "bye") => {
                if let Some((room_id, index)) = &membership {
                    let map = rooms.lock().expect("room map lock");
                    if let Some(members) = map.get(room_id) {
                        for (other, member) in members.iter().enumerate() {
                            if other != *index {
                                let _ = member.send(Message::Text(text.clone()));
                            }
                        }
                    }
                }
            }
            Some("ping") => {
                let _ = tx.send(Message::Text(r#"{"type":"pong"}"#.to_string()));
            }
            _ => {}
        }
    }

    writer.abort();
}
