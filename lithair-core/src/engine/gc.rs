//! Garbage collection (§4.4.8): inactive-peer eviction, then shard
//! trimming up to the minimum cut-point every baseline agrees is safe.
//! Called from within `set_with_gc_retry` and at the end of `sync`; never
//! acquires the operation lock itself, since every caller already holds
//! it.

use std::collections::HashMap;

use regex::Regex;

use super::types::{baseline_key, meta_key, seen_key, shard_key, Baseline, Event, Meta, SeenVector};
use super::{decode, encode, wallclock_now_ms, Applier, EngineResult, StoreAdapter};
use crate::engine::Engine;

impl<A, S> Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    pub(crate) async fn run_gc(&self) -> EngineResult<()> {
        if self.config.remove_inactive_devices {
            self.evict_inactive_peers().await?;
        }

        let baseline_pattern = Regex::new("^b_").expect("static pattern is valid");
        let baselines = self.store.scan(&baseline_pattern).await?;

        let mut guard = self.state.lock().await;
        let safe = if baselines.is_empty() {
            guard.last_increment
        } else {
            let mut min_cut: Option<u64> = None;
            for (key, raw) in &baselines {
                let peer = key.strip_prefix("b_").unwrap_or(key.as_str());
                let baseline: Baseline = decode(peer, raw)?;
                let includes_self = baseline.includes.get(&self.peer_id).copied().unwrap_or(0);
                min_cut = Some(min_cut.map_or(includes_self, |current| current.min(includes_self)));
            }
            min_cut.unwrap_or(0)
        };

        if safe == 0 {
            if self.config.debug {
                log::debug!("peer {}: gc skipped, no provably safe cut-point", self.peer_id);
            }
            return Ok(());
        }

        if self.config.debug {
            log::debug!("peer {}: gc running with safe cut-point {safe}", self.peer_id);
        }

        let active_shards = guard.shards.active_sorted();
        let mut rewritten: HashMap<String, String> = HashMap::new();
        let mut emptied: Vec<String> = Vec::new();
        let mut remaining_shards: Vec<u32> = Vec::new();
        let mut removed_any = false;

        for shard_index in active_shards {
            let key = shard_key(&self.peer_id, shard_index);
            let events: Vec<Event> = match self.store.get(&key).await? {
                Some(raw) => decode(&key, &raw)?,
                None => Vec::new(),
            };
            let original_len = events.len();
            let kept: Vec<Event> = events.into_iter().filter(|e| e.increment > safe).collect();

            if kept.is_empty() {
                if original_len > 0 {
                    emptied.push(key);
                    removed_any = true;
                } else {
                    remaining_shards.push(shard_index);
                }
            } else {
                remaining_shards.push(shard_index);
                if kept.len() < original_len {
                    removed_any = true;
                    rewritten.insert(key, encode(&kept)?);
                }
            }
        }

        if !removed_any {
            return Ok(());
        }

        guard.shards.install(remaining_shards);
        let meta = Meta {
            version: super::PROTOCOL_VERSION,
            last_increment: guard.last_increment,
            shards: guard.shards.active_sorted(),
        };
        drop(guard);

        let mut items = rewritten;
        items.insert(meta_key(&self.peer_id), encode(&meta)?);
        self.store.set(items).await?;
        if !emptied.is_empty() {
            self.store.remove(&emptied).await?;
        }

        Ok(())
    }

    async fn evict_inactive_peers(&self) -> EngineResult<()> {
        let seen_pattern = Regex::new("^s_").expect("static pattern is valid");
        let seen_entries = self.store.scan(&seen_pattern).await?;
        let now = wallclock_now_ms();
        let timeout = self.config.inactive_device_timeout_ms;

        let mut to_evict = Vec::new();
        for (key, raw) in &seen_entries {
            let peer = key.strip_prefix("s_").unwrap_or(key.as_str());
            if peer == self.peer_id {
                continue;
            }
            let seen: SeenVector = decode(peer, raw)?;
            if seen.last_active != 0 && now.saturating_sub(seen.last_active) > timeout {
                to_evict.push(peer.to_string());
            }
        }

        if to_evict.is_empty() {
            return Ok(());
        }

        let mut doomed_keys = Vec::new();
        for peer in &to_evict {
            doomed_keys.push(meta_key(peer));
            doomed_keys.push(baseline_key(peer));
            doomed_keys.push(seen_key(peer));
            if let Some(raw) = self.store.get(&meta_key(peer)).await? {
                let meta: Meta = decode(peer, &raw)?;
                for shard_index in meta.shards {
                    doomed_keys.push(shard_key(peer, shard_index));
                }
            }
        }
        self.store.remove(&doomed_keys).await?;

        let mut guard = self.state.lock().await;
        for peer in &to_evict {
            guard.known_increments.remove(peer);
        }
        guard.last_active_ms = now;
        let known_increments = guard.known_increments.clone();
        drop(guard);

        let seen = SeenVector {
            increments: known_increments,
            last_active: now,
        };
        let mut items = HashMap::new();
        items.insert(seen_key(&self.peer_id), encode(&seen)?);
        self.store.set(items).await?;
        Ok(())
    }
}
