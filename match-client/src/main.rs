use clap::Parser;

use match_client::{Config, Settings};
use peer_net::telemetry;

#[derive(Debug, Parser)]
#[command(author, version, about = "Matchmaking demo: pairs up over a matchmaking service, then chats over a peer-to-peer data channel")]
struct MatchClientCli {
    /// Matchmaking service endpoint.
    #[arg(long, value_name = "URL")]
    matchmaking_url: Option<String>,

    /// Signaling service endpoint.
    #[arg(long, value_name = "URL")]
    signaling_url: Option<String>,
}

impl MatchClientCli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(url) = &self.matchmaking_url {
            settings.matchmaking_url = url.clone();
        }
        if let Some(url) = &self.signaling_url {
            settings.signaling_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    telemetry::init("match-client");

    let cli = MatchClientCli::parse();
    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(%err, "match-client: invalid configuration");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut settings);

    if let Err(err) = match_client::run_with_ctrl_c(Config::from_settings(settings)).await {
        tracing::error!(%err, "match-client terminated with error");
        std::process::exit(1);
    }
}
