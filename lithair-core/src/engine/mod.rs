//! The replication engine: bootstrap, record, sync, baseline refresh, GC,
//! the single-operation-in-flight lock, and the read-only debug view.
//!
//! `Engine<A, S>` is parametric over the host's [`Applier`] and
//! [`StoreAdapter`], the same way this codebase's request handlers are
//! parametric over the application trait they dispatch into. Everything
//! that mutates state goes through `record`/`sync`/`initialize`, each of
//! which acquires [`lock::OperationLock`] first.

pub mod applier;
pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod gc;
pub mod lock;
pub mod record;
pub mod shard;
pub mod store;
pub mod sync;
#[cfg(test)]
mod tests;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{mpsc, Mutex};

use crate::config::EngineConfig;

pub use applier::Applier;
pub use clock::{Hlc, HlcTimestamp};
pub use error::{EngineError, EngineResult, StoreError};
pub use lock::{OperationGuard, OperationLock};
pub use shard::ShardManager;
pub use store::{Change, ChangeBatch, MemoryStore, StoreAdapter};
pub use sync::SyncReport;
pub use types::{
    baseline_key, meta_key, peer_from_meta_key, seen_key, shard_key, Baseline, Event, Increment,
    Meta, Op, SeenVector, MAX_KEY_SIZE, PROTOCOL_VERSION,
};

/// Runtime state mutated under `state`'s mutex. Distinct from the wire
/// records in `types.rs`: this is this peer's working view, rebuilt from
/// the store on `initialize` and kept current by `record`/`sync`/`gc`.
struct EngineState {
    shards: ShardManager,
    last_increment: Increment,
    events_since_baseline: u32,
    syncs_since_gc: u32,
    known_increments: HashMap<String, Increment>,
    last_active_ms: u64,
    initialized: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            shards: ShardManager::from_shards(Vec::new()),
            last_increment: 0,
            events_since_baseline: 0,
            syncs_since_gc: 0,
            known_increments: HashMap::new(),
            last_active_ms: 0,
            initialized: false,
        }
    }
}

/// A read-only snapshot of the engine's state, for diagnostics. Never
/// mutates anything; see §4.4.10.
#[derive(Debug, Clone)]
pub struct DebugView {
    pub peer_id: String,
    pub metas: HashMap<String, Meta>,
    pub events: Vec<Event>,
    pub total_events: usize,
    pub hlc: HlcTimestamp,
    pub current_shard: u32,
    pub events_since_baseline: u32,
    pub syncs_since_gc: u32,
    pub known_increments: HashMap<String, Increment>,
}

pub struct Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    peer_id: String,
    applier: A,
    store: S,
    config: EngineConfig,
    lock: OperationLock,
    hlc: Mutex<Hlc>,
    state: Mutex<EngineState>,
    sync_pending: mpsc::Sender<()>,
    sync_pending_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl<A, S> Engine<A, S>
where
    A: Applier,
    S: StoreAdapter,
{
    /// Builds an uninitialized engine. Callers must still call
    /// [`Engine::initialize`] before `record`/`sync`, and — if reactive
    /// sync-on-remote-change is wanted rather than polling `sync` on a
    /// timer — wrap the result in an `Arc` and call
    /// [`Engine::spawn_change_listener`] once. `initialize` cannot do this
    /// subscription itself: the listener's consuming task needs an
    /// `Arc<Self>`, which a `&self` method can't hand out. A peer that
    /// only ever drives `sync` on its own schedule is still fully
    /// spec-compliant — §4.4.9 calls reactive sync a latency win over
    /// polling, not a consistency requirement.
    pub fn new(peer_id: impl Into<String>, applier: A, store: S, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            peer_id: peer_id.into(),
            applier,
            store,
            config,
            lock: OperationLock::new(),
            hlc: Mutex::new(Hlc::new()),
            state: Mutex::new(EngineState::default()),
            sync_pending: tx,
            sync_pending_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `initialize` (§4.4.2): first-ever peer, restart, or bootstrap,
    /// depending on what `^m_` currently holds.
    ///
    /// This does **not** subscribe a change handler — §4.4.2 describes
    /// that as the step immediately following the critical section, but
    /// it requires an `Arc<Self>` this `&self` method doesn't have. Call
    /// [`Engine::spawn_change_listener`] on an `Arc`-wrapped engine right
    /// after `initialize` returns if you want remote writes to trigger a
    /// `sync` automatically; see [`Engine::new`].
    pub async fn initialize(&self) -> EngineResult<()> {
        let _guard = self.lock.try_acquire()?;
        let pattern = Regex::new("^m_").expect("static pattern is valid");
        let metas = self.store.scan(&pattern).await?;

        if metas.is_empty() {
            self.initialize_as_first_peer().await
        } else if let Some(raw) = metas.get(&meta_key(&self.peer_id)) {
            self.initialize_as_restart(raw).await
        } else {
            self.bootstrap(&metas).await
        }
    }

    async fn initialize_as_first_peer(&self) -> EngineResult<()> {
        if self.config.debug {
            log::debug!(
                "peer {}: no existing peers found, initializing as first-ever peer",
                self.peer_id
            );
        }
        let meta = Meta {
            version: PROTOCOL_VERSION,
            last_increment: 0,
            shards: vec![0],
        };
        let now = wallclock_now_ms();
        let seen = SeenVector {
            increments: HashMap::new(),
            last_active: now,
        };

        let mut items = HashMap::new();
        items.insert(meta_key(&self.peer_id), encode(&meta)?);
        items.insert(seen_key(&self.peer_id), encode(&seen)?);
        if let Some(state) = self.applier.snapshot().await {
            let baseline = Baseline {
                includes: HashMap::new(),
                state,
            };
            items.insert(baseline_key(&self.peer_id), encode(&baseline)?);
        }
        self.store.set(items).await?;

        let mut guard = self.state.lock().await;
        guard.shards = ShardManager::from_shards(vec![0]);
        guard.last_increment = 0;
        guard.known_increments = HashMap::new();
        guard.last_active_ms = now;
        guard.initialized = true;
        Ok(())
    }

    async fn initialize_as_restart(&self, raw_meta: &str) -> EngineResult<()> {
        let meta: Meta = decode(&self.peer_id, raw_meta)?;
        if meta.version < PROTOCOL_VERSION {
            return Err(EngineError::UnsupportedVersion {
                peer: self.peer_id.clone(),
                found: meta.version,
                required: PROTOCOL_VERSION,
            });
        }

        let seen_raw = self.store.get(&seen_key(&self.peer_id)).await?;
        let (known_increments, last_active_ms) = match seen_raw {
            Some(raw) => {
                let seen: SeenVector = decode(&self.peer_id, &raw)?;
                (seen.increments, seen.last_active)
            }
            None => (HashMap::new(), wallclock_now_ms()),
        };

        let shards = ShardManager::from_shards(meta.shards);
        if let Some(last_stamp) = self.last_own_hlc_stamp(&shards).await? {
            *self.hlc.lock().await = Hlc::from_timestamp(last_stamp);
        }

        let mut guard = self.state.lock().await;
        guard.shards = shards;
        guard.last_increment = meta.last_increment;
        guard.known_increments = known_increments;
        guard.last_active_ms = last_active_ms;
        guard.events_since_baseline = 0;
        guard.syncs_since_gc = 0;
        guard.initialized = true;
        Ok(())
    }

    /// Scans this peer's own active shards for the greatest
    /// `(hlc_time, hlc_counter)` reading it has ever stamped, so a
    /// restarting peer can resume its `Hlc` from there (`Hlc::from_timestamp`)
    /// instead of blindly starting a fresh clock at the current wall time,
    /// which could regress below a counter this peer already stamped and
    /// wrote if its wall clock now reads behind where it previously did.
    /// Returns `None` if the peer has no events yet (first restart after
    /// `initialize_as_first_peer`, before any `record`).
    async fn last_own_hlc_stamp(&self, shards: &ShardManager) -> EngineResult<Option<HlcTimestamp>> {
        let mut latest: Option<HlcTimestamp> = None;
        for shard_index in shards.active_sorted() {
            let key = shard_key(&self.peer_id, shard_index);
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let events: Vec<Event> = decode(&key, &raw)?;
            for event in events {
                let stamp = HlcTimestamp {
                    time: event.hlc_time,
                    counter: event.hlc_counter,
                };
                let is_newer = match latest {
                    Some(current) => (stamp.time, stamp.counter) > (current.time, current.counter),
                    None => true,
                };
                if is_newer {
                    latest = Some(stamp);
                }
            }
        }
        Ok(latest)
    }

    /// Writes `items`, running GC and retrying once on `QuotaExceeded`
    /// (§4.4.6). Callers hold the operation lock already.
    pub(crate) async fn set_with_gc_retry(&self, items: HashMap<String, String>) -> EngineResult<()> {
        match self.store.set(items.clone()).await {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded) => {
                log::warn!("store quota exceeded, running garbage collection and retrying once");
                self.run_gc().await?;
                self.store.set(items).await.map_err(EngineError::from)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Spawns the background change-reaction loop (§4.4.9, §9): one task
    /// observes store notifications and enqueues onto a bounded
    /// single-slot channel, a second drains that channel and calls
    /// `sync`. Neither task calls `sync` directly from the subscriber
    /// callback, so a storm of remote writes coalesces into at most one
    /// pending sync.
    pub fn spawn_change_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        A: 'static,
        S: 'static,
    {
        let watcher = Arc::clone(self);
        let mut receiver = self.store.subscribe();
        let notifier = self.sync_pending.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(batch) => {
                        let self_meta = meta_key(&watcher.peer_id);
                        let relevant = batch
                            .iter()
                            .any(|change| change.key.starts_with("m_") && change.key != self_meta);
                        if relevant {
                            let _ = notifier.try_send(());
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let syncer = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = syncer
                .sync_pending_rx
                .lock()
                .await
                .take()
                .expect("sync-pending receiver taken at most once");
            while rx.recv().await.is_some() {
                match syncer.sync().await {
                    Ok(_) | Err(EngineError::Busy) => {}
                    Err(err) => log::warn!("deferred sync failed: {err}"),
                }
            }
        })
    }

    /// Unlocked, read-only (§4.4.10). Never mutates engine state.
    pub async fn debug_view(&self) -> EngineResult<DebugView> {
        let meta_pattern = Regex::new("^m_").expect("static pattern is valid");
        let raw_metas = self.store.scan(&meta_pattern).await?;
        let mut metas = HashMap::with_capacity(raw_metas.len());
        for (key, raw) in &raw_metas {
            if let Some(peer) = peer_from_meta_key(key) {
                metas.insert(peer.to_string(), decode(peer, raw)?);
            }
        }

        let guard = self.state.lock().await;
        let mut events = Vec::new();
        for shard in guard.shards.active_sorted() {
            let key = shard_key(&self.peer_id, shard);
            if let Some(raw) = self.store.get(&key).await? {
                let mut parsed: Vec<Event> = decode(&self.peer_id, &raw)?;
                events.append(&mut parsed);
            }
        }
        let hlc = self.hlc.lock().await.snapshot();

        Ok(DebugView {
            peer_id: self.peer_id.clone(),
            metas,
            total_events: events.len(),
            events,
            hlc,
            current_shard: guard.shards.current(),
            events_since_baseline: guard.events_since_baseline,
            syncs_since_gc: guard.syncs_since_gc,
            known_increments: guard.known_increments.clone(),
        })
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|source| EngineError::Serialization {
        key: std::any::type_name::<T>().to_string(),
        source,
    })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> EngineResult<T> {
    serde_json::from_str(raw).map_err(|source| EngineError::Serialization {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn wallclock_now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
