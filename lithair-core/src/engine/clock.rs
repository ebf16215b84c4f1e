//! Hybrid Logical Clock: local tick and causal merge.
//!
//! `(time, counter)` is kept strictly increasing on this peer across both
//! local appends (`advance`) and remote observations (`update`); the
//! comparator (`compare`) is the sole total order used for replay.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A single `(time, counter)` reading, as stamped onto an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HlcTimestamp {
    pub time: u64,
    pub counter: u32,
}

/// Per-peer Hybrid Logical Clock state.
#[derive(Debug, Clone)]
pub struct Hlc {
    time: u64,
    counter: u32,
}

impl Default for Hlc {
    fn default() -> Self {
        Self::new()
    }
}

impl Hlc {
    pub fn new() -> Self {
        Self {
            time: wallclock_now(),
            counter: 0,
        }
    }

    /// Restores a clock from a previously observed reading, e.g. after a
    /// restart where the last stamped timestamp is known.
    pub fn from_timestamp(ts: HlcTimestamp) -> Self {
        Self {
            time: ts.time,
            counter: ts.counter,
        }
    }

    pub fn snapshot(&self) -> HlcTimestamp {
        HlcTimestamp {
            time: self.time,
            counter: self.counter,
        }
    }

    /// Called on local append: stamps a new, strictly-advancing reading.
    pub fn advance(&mut self) -> HlcTimestamp {
        let now = wallclock_now();
        if now > self.time {
            self.time = now;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        self.snapshot()
    }

    /// Called on receiving a remote event's `(rt, rc)`: merges it in so the
    /// local clock is strictly greater than both its prior state and the
    /// remote reading.
    pub fn update(&mut self, remote_time: u64, remote_counter: u32) -> HlcTimestamp {
        let now = wallclock_now();
        let merged = self.time.max(remote_time).max(now);

        if merged == self.time && merged == remote_time {
            self.counter = self.counter.max(remote_counter) + 1;
        } else if merged == remote_time {
            self.time = remote_time;
            self.counter = remote_counter + 1;
        } else {
            self.time = merged;
            self.counter = 0;
        }

        self.snapshot()
    }

    /// The sole comparator used for replay ordering: lexicographic on
    /// `(time, counter, peer_id)`. Peer id breaks ties only between
    /// genuinely concurrent events and is byte-lexicographic, not
    /// locale-aware.
    pub fn compare(
        a_time: u64,
        a_counter: u32,
        a_peer: &str,
        b_time: u64,
        b_counter: u32,
        b_peer: &str,
    ) -> Ordering {
        (a_time, a_counter, a_peer).cmp(&(b_time, b_counter, b_peer))
    }
}

fn wallclock_now() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
