//! Pull-based incremental sync (§4.4.7): scan every peer's meta, fetch
//! whatever this peer hasn't seen yet, replay in HLC order, then
//! periodically trigger garbage collection.

use std::collections::HashMap;

use regex::Regex;

use super::clock::Hlc;
use super::types::{seen_key, Event, Meta, SeenVector, PROTOCOL_VERSION};
use super::{decode, encode, wallclock_now_ms, Applier, EngineError, EngineResult, StoreAdapter};
use crate::engine::Engine;

const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Result of one `sync` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub events_applied: u64,
}

impl<A, S> Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    pub async fn sync(&self) -> EngineResult<SyncReport> {
        let _guard = self.lock.try_acquire()?;

        let pattern = Regex::new("^(m_|e_)").expect("static pattern is valid");
        let all = self.store.scan(&pattern).await?;

        let mut metas: HashMap<String, Meta> = HashMap::new();
        for (key, raw) in &all {
            if let Some(peer) = super::peer_from_meta_key(key) {
                metas.insert(peer.to_string(), decode(peer, raw)?);
            }
        }

        let mut state = self.state.lock().await;
        let mut collected: Vec<(String, Event)> = Vec::new();

        for (peer, meta) in &metas {
            if peer == &self.peer_id {
                continue;
            }
            if meta.version < PROTOCOL_VERSION {
                return Err(EngineError::UnsupportedVersion {
                    peer: peer.clone(),
                    found: meta.version,
                    required: PROTOCOL_VERSION,
                });
            }

            let known = state.known_increments.entry(peer.clone()).or_insert(0);
            if meta.last_increment > *known {
                let cut = *known;
                for shard_index in &meta.shards {
                    let key = super::shard_key(peer, *shard_index);
                    if let Some(raw) = all.get(&key) {
                        let events: Vec<Event> = decode(&key, raw)?;
                        for event in events {
                            if event.increment > cut {
                                collected.push((peer.clone(), event));
                            }
                        }
                    }
                }
                // `knownIncrements[peer]` advances to `meta.last_increment`
                // even though some of those increments may never be fetched
                // here: if the remote has already GC'd a shard prefix, the
                // events in it are gone from `e_<peer>_*` but are guaranteed
                // to be folded into some baseline this peer loaded (its own
                // or one inherited at bootstrap). Soundness rests on
                // baseline coverage, not on having physically seen every
                // increment's shard entry; see the baseline-safety property.
                *known = meta.last_increment;
            }
        }
        drop(state);

        collected.sort_by(|(a_peer, a), (b_peer, b)| {
            Hlc::compare(a.hlc_time, a.hlc_counter, a_peer, b.hlc_time, b.hlc_counter, b_peer)
        });

        if self.config.debug {
            log::debug!(
                "peer {}: sync collected {} remote events across {} peers",
                self.peer_id,
                collected.len(),
                metas.len()
            );
        }

        let mut applied_count: u64 = 0;
        for (_, event) in &collected {
            self.applier.apply_event(event).await;
            self.hlc.lock().await.update(event.hlc_time, event.hlc_counter);
            applied_count += 1;
        }

        let now = wallclock_now_ms();
        let mut state = self.state.lock().await;
        let stale = now.saturating_sub(state.last_active_ms) > ONE_DAY_MS;
        if applied_count > 0 || stale {
            state.last_active_ms = now;
            let seen = SeenVector {
                increments: state.known_increments.clone(),
                last_active: now,
            };
            drop(state);
            let mut items = HashMap::new();
            items.insert(seen_key(&self.peer_id), encode(&seen)?);
            self.store.set(items).await?;
            state = self.state.lock().await;
        }

        state.syncs_since_gc += 1;
        let should_gc = state.syncs_since_gc >= self.config.gc_frequency;
        if should_gc {
            state.syncs_since_gc = 0;
        }
        drop(state);

        if should_gc {
            self.run_gc().await?;
        }

        Ok(SyncReport {
            events_applied: applied_count,
        })
    }
}
