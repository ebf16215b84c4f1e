//! Record (§4.4.4) and baseline refresh (§4.4.5): the only path through
//! which a peer mutates its own log.

use std::collections::HashMap;

use super::types::{baseline_key, meta_key, shard_key, Baseline, Event, Increment, Meta, Op};
use super::{encode, wallclock_now_ms, Applier, EngineError, EngineResult, StoreAdapter};
use crate::engine::Engine;

impl<A, S> Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    /// Appends one event to this peer's own log. Fails `EventTooLarge`
    /// before anything is written if the event alone would overflow a
    /// shard; never partially writes.
    pub async fn record(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> EngineResult<Increment> {
        let _guard = self.lock.try_acquire()?;

        let stamp = self.hlc.lock().await.advance();
        let (time, counter) = (stamp.time, stamp.counter);
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let increment = state.last_increment + 1;
        let event = Event {
            increment,
            hlc_time: time,
            hlc_counter: counter,
            op: Op {
                kind: event_type.into(),
                data,
            },
        };
        state.shards.validate_event_size(&event)?;

        let current_shard = state.shards.current();
        let shard_key_str = shard_key(&self.peer_id, current_shard);
        let existing = match self.store.get(&shard_key_str).await? {
            Some(raw) => super::decode::<Vec<Event>>(&shard_key_str, &raw)?,
            None => Vec::new(),
        };

        let (target_shard, mut events) = if !existing.is_empty() && state.shards.should_roll(&existing, &event) {
            let opened = state.shards.open_new_shard();
            (opened, Vec::new())
        } else {
            (current_shard, existing)
        };
        // `current_shard` may have been GC'd out of the active set (§8.5)
        // while remaining "current"; appending into it must re-activate it
        // so `active_sorted()` below advertises it in `m_self.shards` —
        // otherwise the event we're about to write is orphaned from every
        // other peer's sync, which only fetches shards listed there.
        state.shards.activate(target_shard);
        events.push(event);

        let meta = Meta {
            version: super::PROTOCOL_VERSION,
            last_increment: increment,
            shards: state.shards.active_sorted(),
        };

        let mut items = HashMap::new();
        items.insert(shard_key(&self.peer_id, target_shard), encode(&events)?);
        items.insert(meta_key(&self.peer_id), encode(&meta)?);
        drop(state);
        self.set_with_gc_retry(items).await?;

        let mut state = self.state.lock().await;
        state.last_increment = increment;
        state.events_since_baseline += 1;
        let should_refresh_baseline =
            state.events_since_baseline >= self.config.baseline_threshold;
        drop(state);

        if should_refresh_baseline {
            self.refresh_baseline().await?;
        }

        Ok(increment)
    }

    /// Baseline refresh (§4.4.5). Silently skipped if the applier never
    /// registers a `snapshot` handler — a bootstrap-only peer stays legal
    /// and simply never advertises a baseline.
    pub(crate) async fn refresh_baseline(&self) -> EngineResult<()> {
        let Some(state_blob) = self.applier.snapshot().await else {
            return Ok(());
        };

        let mut guard = self.state.lock().await;
        let mut includes = guard.known_increments.clone();
        includes.insert(self.peer_id.clone(), guard.last_increment);
        let baseline = Baseline {
            includes,
            state: state_blob,
        };
        drop(guard);

        let mut items = HashMap::new();
        items.insert(baseline_key(&self.peer_id), encode(&baseline)?);
        self.set_with_gc_retry(items).await?;

        let mut guard = self.state.lock().await;
        guard.events_since_baseline = 0;
        Ok(())
    }
}
