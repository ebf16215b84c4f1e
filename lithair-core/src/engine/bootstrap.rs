//! Bootstrap (§4.4.3): a brand-new peer joining a store that already has
//! other peers in it. Picks one existing baseline, replays whatever
//! follows it, and writes this peer's own empty meta/seen-vector (and,
//! if the applier advertises one, its own baseline).

use std::collections::HashMap;

use super::clock::Hlc;
use super::types::{
    baseline_key, meta_key, seen_key, shard_key, Baseline, Event, Increment, Meta, SeenVector,
    PROTOCOL_VERSION,
};
use super::{decode, encode, wallclock_now_ms, Applier, EngineError, EngineResult, StoreAdapter};
use crate::engine::Engine;

impl<A, S> Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    /// `metas` is every `m_<peer>` entry already in the store, keyed by
    /// its full key (`m_alice`, not `alice`). Called from `initialize`
    /// while the operation lock is held.
    pub(super) async fn bootstrap(&self, metas: &HashMap<String, String>) -> EngineResult<()> {
        let mut peers: Vec<(String, Meta)> = Vec::with_capacity(metas.len());
        for (key, raw) in metas {
            let peer = super::peer_from_meta_key(key)
                .unwrap_or(key.as_str())
                .to_string();
            let meta: Meta = decode(&peer, raw)?;
            if meta.version < PROTOCOL_VERSION {
                return Err(EngineError::UnsupportedVersion {
                    peer,
                    found: meta.version,
                    required: PROTOCOL_VERSION,
                });
            }
            peers.push((peer, meta));
        }
        // Deterministic pick: sort by peer id so bootstrap behavior never
        // depends on `scan`'s (unspecified) iteration order.
        peers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut includes: HashMap<String, Increment> = HashMap::new();
        for (peer, _) in &peers {
            if let Some(raw) = self.store.get(&baseline_key(peer)).await? {
                let baseline: Baseline = decode(peer, &raw)?;
                if self.config.debug {
                    log::debug!(
                        "peer {}: bootstrapping from {peer}'s baseline, includes {:?}",
                        self.peer_id,
                        baseline.includes
                    );
                }
                self.applier.load_snapshot(baseline.state).await;
                includes = baseline.includes;
                break;
            }
        }

        let mut collected: Vec<(String, Event)> = Vec::new();
        let mut known_increments: HashMap<String, Increment> = HashMap::new();
        for (peer, meta) in &peers {
            let cut = includes.get(peer).copied().unwrap_or(0);
            for shard_index in meta.shards.iter().copied() {
                let key = shard_key(peer, shard_index);
                if let Some(raw) = self.store.get(&key).await? {
                    let events: Vec<Event> = decode(peer, &raw)?;
                    for event in events {
                        if event.increment > cut {
                            collected.push((peer.clone(), event));
                        }
                    }
                }
            }
            known_increments.insert(peer.clone(), meta.last_increment);
        }

        collected.sort_by(|(a_peer, a), (b_peer, b)| {
            Hlc::compare(a.hlc_time, a.hlc_counter, a_peer, b.hlc_time, b.hlc_counter, b_peer)
        });

        for (_, event) in &collected {
            self.applier.apply_event(event).await;
            self.hlc.lock().await.update(event.hlc_time, event.hlc_counter);
        }

        let now = wallclock_now_ms();
        let meta = Meta {
            version: PROTOCOL_VERSION,
            last_increment: 0,
            shards: vec![0],
        };
        let seen = SeenVector {
            increments: known_increments.clone(),
            last_active: now,
        };

        let mut items = HashMap::new();
        items.insert(meta_key(&self.peer_id), encode(&meta)?);
        items.insert(seen_key(&self.peer_id), encode(&seen)?);
        if let Some(state) = self.applier.snapshot().await {
            let baseline = Baseline {
                includes: known_increments.clone(),
                state,
            };
            items.insert(baseline_key(&self.peer_id), encode(&baseline)?);
        }
        self.store.set(items).await?;

        let mut guard = self.state.lock().await;
        guard.shards = super::ShardManager::from_shards(vec![0]);
        guard.last_increment = 0;
        guard.known_increments = known_increments;
        guard.last_active_ms = now;
        guard.initialized = true;
        Ok(())
    }
}
