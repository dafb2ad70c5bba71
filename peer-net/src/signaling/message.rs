//! Wire messages for the signaling socket.
//!
//! The signaling service speaks a small JSON protocol: a client registers
//! into a room, the server accepts (telling it whether a remote client is
//! already present) or rejects, and from then on the socket only relays
//! SDP descriptions and trickled ICE candidates between the two room
//! members, plus keepalive pings.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    #[serde(rename_all = "camelCase")]
    Register {
        room_id: String,
        client_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Accept {
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
        #[serde(default)]
        is_exist_client: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        ice_servers: Option<Vec<IceServerConfig>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        authz_metadata: Option<serde_json::Value>,
    },
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        ice: IceCandidatePayload,
    },
    Ping,
    Pong,
    Bye,
}

/// ICE server entry as carried on the wire. Converted into the `webrtc`
/// crate's config type before the peer connection is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<IceServerConfig> for RTCIceServer {
    fn from(config: IceServerConfig) -> Self {
        RTCIceServer {
            urls: config.urls,
            username: config.username.unwrap_or_default(),
            credential: config.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Trickled ICE candidate as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for IceCandidatePayload {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidatePayload> for RTCIceCandidateInit {
    fn from(payload: IceCandidatePayload) -> Self {
        RTCIceCandidateInit {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_m_line_index,
            username_fragment: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_uses_camel_case_fields() {
        let msg = SignalMessage::Register {
            room_id: "room-1".into(),
            client_id: "client-1".into(),
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).expect("encode")).expect("json");
        assert_eq!(value["type"], "register");
        assert_eq!(value["roomId"], "room-1");
        assert_eq!(value["clientId"], "client-1");
    }

    #[test]
    fn accept_defaults_to_no_existing_client() {
        let msg: SignalMessage = serde_json::from_str(r#"{"type":"accept"}"#).expect("decode");
        match msg {
            SignalMessage::Accept {
                is_exist_client,
                ice_servers,
                ..
            } => {
                assert!(!is_exist_client);
                assert!(ice_servers.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn candidate_field_spelling() {
        let msg = SignalMessage::Candidate {
            ice: IceCandidatePayload {
                candidate: "candidate:0 1 UDP 1 127.0.0.1 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).expect("encode")).expect("json");
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["ice"]["sdpMid"], "0");
        assert_eq!(value["ice"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn keepalives_are_bare_tags() {
        assert_eq!(
            serde_json::to_string(&SignalMessage::Ping).expect("encode"),
            r#"{"type":"ping"}"#
        );
        let msg: SignalMessage = serde_json::from_str(r#"{"type":"pong"}"#).expect("decode");
        assert!(matches!(msg, SignalMessage::Pong));
    }
}
