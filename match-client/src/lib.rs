use chrono::Utc;
use peer_net::{
    identity,
    matchmaking::{MatchRequest, MatchResponse, MatchmakingClient},
    session, shutdown, BoxError,
};
use tokio::sync::oneshot;
use tracing::{error, info};

const DEFAULT_MATCHMAKING_URL: &str = "ws://127.0.0.1:8000/";
const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3000/signaling";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Settings {
    pub matchmaking_url: String,
    pub signaling_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            matchmaking_url: DEFAULT_MATCHMAKING_URL.to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, BoxError> {
        Ok(Self {
            matchmaking_url: std::env::var("MATCH_CLIENT_MATCHMAKING_URL")
                .unwrap_or_else(|_| DEFAULT_MATCHMAKING_URL.to_string()),
            signaling_url: std::env::var("MATCH_CLIENT_SIGNALING_URL")
                .unwrap_or_else(|_| DEFAULT_SIGNALING_URL.to_string()),
        })
    }
}

#[derive(Debug)]
pub struct Config {
    pub matchmaking_url: String,
    pub signaling_url: String,
    /// Test hook: fires once when the matchmaking service pairs us.
    pub matched_tx: Option<oneshot::Sender<MatchResponse>>,
}

impl Config {
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            matchmaking_url: settings.matchmaking_url,
            signaling_url: settings.signaling_url,
            matched_tx: None,
        }
    }

    pub fn from_env() -> Result<Self, BoxError> {
        Settings::from_env().map(Self::from_settings)
    }
}

pub async fn run_with_ctrl_c(config: Config) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "match-client: cannot listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run(config, shutdown_rx).await;

    ctrl_c.abort();
    result
}

/// One full demo run: generate an identity, ask the matchmaking service
/// for a peer, and on the first MATCH drive a single peer session until
/// the shutdown signal fires. Every error returned here is fatal; there
/// are no retries.
pub async fn run(config: Config, shutdown_rx: shutdown::ShutdownReceiver) -> Result<(), BoxError> {
    let now = Utc::now();
    let user_id = identity::short_user_id(now);

    let mut client = MatchmakingClient::connect(&config.matchmaking_url).await?;
    client
        .submit(&MatchRequest {
            user_id: user_id.clone(),
            created_at: now,
        })
        .await?;
    info!(%user_id, "waiting for a match");

    let matched = client.wait_for_match().await?;
    info!(peer = %matched.user_id, room = %matched.room_id, "matched, starting peer session");

    if let Some(tx) = config.matched_tx {
        let _ = tx.send(matched.clone());
    }

    // Only the first match is acted upon; the matchmaking socket is
    // dropped once the session starts.
    session::run(
        &config.signaling_url,
        &matched.room_id,
        &user_id,
        shutdown_rx,
    )
    .await?;

    Ok(())
}
