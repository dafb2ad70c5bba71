pub mod identity;
pub mod matchmaking;
pub mod session;
pub mod shutdown;
pub mod signaling;
pub mod telemetry;
pub mod testing;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
