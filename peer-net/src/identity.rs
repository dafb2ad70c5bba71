//! Short user identifiers for the matchmaking handshake.
//!
//! The id is a truncated SHA-256 of the startup timestamp: stable for the
//! lifetime of one process run, short enough to read in logs, and only
//! probabilistically unique (the truncation makes collisions possible and
//! that is accepted for a demo).

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Length of the generated identifier, in hex characters.
pub const USER_ID_LEN: usize = 7;

/// Derive the user id from a timestamp. Deterministic: the same instant
/// always yields the same id.
pub fn short_user_id(now: DateTime<Utc>) -> String {
    let digest = Sha256::digest(now.to_rfc3339().as_bytes());

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(USER_ID_LEN);
    hex
}
