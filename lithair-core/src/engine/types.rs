//! The four key families and the event record, per the data model.
//!
//! Every value that crosses the `StoreAdapter` boundary is plain JSON —
//! opaque to the store, meaningful only to the engine and, for `op.data`,
//! to the host's `Applier`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Largest value a single `e_<P>_<i>`, `b_<P>` or `m_<P>` entry may
/// serialize to before the store adapter is expected to reject it.
pub const MAX_KEY_SIZE: usize = 7168;

/// Current protocol version. Readers reject metas advertising a lower one.
pub const PROTOCOL_VERSION: u32 = 1;

/// A strictly-monotonic ordinal assigned by the author that produced an
/// event. Never reused, never produced out of order by a conforming peer.
pub type Increment = u64;

/// `m_<peer>` — authored only by `peer`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    pub version: u32,
    pub last_increment: Increment,
    pub shards: Vec<u32>,
}

/// `e_<peer>_<shard>` — an ordered list of events, strictly ascending by
/// `increment` within the shard.
pub type Shard = Vec<Event>;

/// `b_<peer>` — a cut of the event log plus the application state folded
/// up to that cut.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Baseline {
    pub includes: HashMap<String, Increment>,
    pub state: serde_json::Value,
}

/// `s_<peer>` — the peer's record of what it has observed from everyone
/// else, plus its own last productive-sync time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenVector {
    pub increments: HashMap<String, Increment>,
    #[serde(rename = "lastActive")]
    pub last_active: u64,
}

/// A single opaque application-level mutation, as appended to a shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub increment: Increment,
    pub hlc_time: u64,
    pub hlc_counter: u32,
    pub op: Op,
}

/// The opaque payload the engine carries but never interprets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Op {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

pub fn meta_key(peer: &str) -> String {
    format!("m_{peer}")
}

pub fn shard_key(peer: &str, shard: u32) -> String {
    format!("e_{peer}_{shard}")
}

pub fn baseline_key(peer: &str) -> String {
    format!("b_{peer}")
}

pub fn seen_key(peer: &str) -> String {
    format!("s_{peer}")
}

/// Extracts the peer id out of a `m_<peer>` key. Returns `None` for keys
/// that don't match the family.
pub fn peer_from_meta_key(key: &str) -> Option<&str> {
    key.strip_prefix("m_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers_roundtrip_peer_id() {
        assert_eq!(meta_key("alice"), "m_alice");
        assert_eq!(shard_key("alice", 3), "e_alice_3");
        assert_eq!(baseline_key("alice"), "b_alice");
        assert_eq!(seen_key("alice"), "s_alice");
        assert_eq!(peer_from_meta_key("m_alice"), Some("alice"));
        assert_eq!(peer_from_meta_key("e_alice_3"), None);
    }
}
