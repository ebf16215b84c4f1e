//! Tracks which shard indices are in use for one peer's event log and
//! decides when the active shard would overflow the store's per-key
//! budget and a new one must be opened.

use super::error::EngineError;
use super::types::{Event, MAX_KEY_SIZE};

/// Active shard indices for a single peer, plus which one is "current"
/// (the one new events are appended to).
#[derive(Debug, Clone)]
pub struct ShardManager {
    current: u32,
    active: Vec<u32>,
}

impl ShardManager {
    /// Builds a manager from an existing, possibly-empty shard list
    /// (as read from `m_<peer>.shards`). `current` becomes the largest
    /// index present, or `0` if the list is empty.
    pub fn from_shards(mut shards: Vec<u32>) -> Self {
        shards.sort_unstable();
        shards.dedup();
        let current = shards.last().copied().unwrap_or(0);
        Self {
            current,
            active: shards,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Ascending list of shard indices that currently hold any event.
    pub fn active_sorted(&self) -> Vec<u32> {
        let mut sorted = self.active.clone();
        sorted.sort_unstable();
        sorted
    }

    /// Fails if a single event, on its own, would meet or exceed the
    /// store's per-key size budget — such an event can never be written,
    /// regardless of shard state.
    pub fn validate_event_size(&self, event: &Event) -> Result<(), EngineError> {
        let size = serialized_size(&[event.clone()]);
        if size >= MAX_KEY_SIZE {
            return Err(EngineError::EventTooLarge { size });
        }
        Ok(())
    }

    /// True iff appending `candidate` to `existing` would push the
    /// combined shard's serialized size to the budget. The estimate is
    /// the byte-exact serialized length, which is conservative relative
    /// to the spec's UTF-16-worst-case estimator since this engine
    /// serializes to UTF-8 JSON (`estimated >= actual` always holds).
    pub fn should_roll(&self, existing: &[Event], candidate: &Event) -> bool {
        let mut combined = Vec::with_capacity(existing.len() + 1);
        combined.extend_from_slice(existing);
        combined.push(candidate.clone());
        serialized_size(&combined) >= MAX_KEY_SIZE
    }

    /// Opens and activates a new shard, returning its index.
    pub fn open_new_shard(&mut self) -> u32 {
        self.current += 1;
        self.active.push(self.current);
        self.current
    }

    /// Ensures `shard` is a member of the active set. GC can empty and
    /// remove the shard a peer is still nominally "current" on (§8.5:
    /// `shards = []` with `current` unchanged); appending into that
    /// state must re-activate the shard so `active_sorted()` — and thus
    /// `m_self.shards` — advertises it again, or the event it carries
    /// becomes invisible to every other peer's `sync`. A no-op if the
    /// shard is already active.
    pub fn activate(&mut self, shard: u32) {
        if !self.active.contains(&shard) {
            self.active.push(shard);
        }
        if shard > self.current {
            self.current = shard;
        }
    }

    /// Installs a shard manager from a remaining set of shard indices
    /// after GC has emptied (and removed) some of them.
    pub fn install(&mut self, remaining: Vec<u32>) {
        *self = Self::from_shards(remaining);
    }
}

fn serialized_size(events: &[Event]) -> usize {
    serde_json::to_vec(events)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}
