//! Matchmaking handshake: one request out, then a blocking receive loop
//! until the service pairs us into a room.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

/// Discriminator value that carries an actual pairing. Everything else on
/// the socket is informational and ignored.
pub const MATCH_TYPE: &str = "MATCH";

/// Sent exactly once after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Every inbound matchmaking frame decodes into this. The `type` field is
/// kept as a free string so unknown discriminators pass through the loop
/// instead of failing decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub room_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl MatchResponse {
    pub fn is_match(&self) -> bool {
        self.kind == MATCH_TYPE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("matchmaking socket error: {0}")]
    Transport(#[from] WsError),
    #[error("matchmaking message could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("matchmaking socket closed before a match arrived")]
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Long-lived socket to the matchmaking service.
pub struct MatchmakingClient {
    stream: WsStream,
}

impl MatchmakingClient {
    /// Open the socket. A connect failure is fatal at the call site; there
    /// is no retry.
    pub async fn connect(url: &str) -> Result<Self, MatchmakingError> {
        let (stream, _response) = connect_async(url).await?;
        info!(%url, "matchmaking socket open");
        Ok(Self { stream })
    }

    /// Serialize and send the join request as a single text message.
    pub async fn submit(&mut self, request: &MatchRequest) -> Result<(), MatchmakingError> {
        let text = serde_json::to_string(request)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Receive the next matchmaking response, answering pings along the
    /// way. A frame that does not decode as [`MatchResponse`] is an error,
    /// never skipped.
    pub async fn next_response(&mut self) -> Result<MatchResponse, MatchmakingError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(serde_json::from_str(&text)?);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(serde_json::from_slice(&bytes)?);
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.stream.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(MatchmakingError::Closed),
                Some(Ok(other)) => {
                    debug!(frame = ?other, "ignoring unexpected matchmaking frame");
                }
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Block until the service sends a MATCH response. Non-MATCH responses
    /// are logged and dropped; the loop has no timeout.
    pub async fn wait_for_match(&mut self) -> Result<MatchResponse, MatchmakingError> {
        loop {
            let response = self.next_response().await?;
            if response.is_match() {
                return Ok(response);
            }
            debug!(kind = %response.kind, "ignoring non-match response");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn request_wire_format() {
        let request = MatchRequest {
            user_id: "ab12cd3".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap(),
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).expect("encode")).expect("json");
        assert_eq!(value["user_id"], "ab12cd3");
        assert_eq!(value["created_at"], "2024-05-17T09:30:00Z");
    }

    #[test]
    fn response_discriminator_is_type_field() {
        let raw = r#"{
            "type": "MATCH",
            "room_id": "room-1",
            "user_id": "ffee001",
            "created_at": "2024-05-17T09:30:00Z"
        }"#;

        let response: MatchResponse = serde_json::from_str(raw).expect("decode");
        assert!(response.is_match());
        assert_eq!(response.room_id, "room-1");
        assert_eq!(response.user_id, "ffee001");
    }

    #[test]
    fn unknown_discriminator_still_decodes() {
        let raw = r#"{
            "type": "WAITING",
            "room_id": "",
            "user_id": "",
            "created_at": "2024-05-17T09:30:00Z"
        }"#;

        let response: MatchResponse = serde_json::from_str(raw).expect("decode");
        assert!(!response.is_match());
    }
}
