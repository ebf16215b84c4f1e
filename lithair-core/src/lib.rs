//! Lithair Core - event-sourced multi-writer replication engine
//!
//! Synchronizes a user-defined application state across an unbounded
//! number of peers through a shared key-value blob store, with no
//! direct peer-to-peer communication. Events are totally ordered with a
//! Hybrid Logical Clock; periodic baselines bound bootstrap cost; event
//! logs are sharded so no single store key grows past the adapter's
//! per-key budget; garbage collection reclaims quota once every peer's
//! baseline has absorbed a prefix of the log.
//!
//! # Quick Start
//!
//! Implement [`engine::Applier`] for your state model, pick a
//! [`engine::StoreAdapter`] (use [`engine::MemoryStore`] for tests, or
//! write an adapter over your real key-value store), and drive an
//! [`engine::Engine`]. Wrap it in an `Arc` and call
//! [`engine::Engine::spawn_change_listener`] once if you want remote
//! writes to trigger `sync` automatically rather than polling it
//! yourself:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lithair_core::{config::EngineConfig, engine::{Engine, MemoryStore}};
//!
//! # async fn run(applier: impl lithair_core::engine::Applier + 'static) -> lithair_core::engine::EngineResult<()> {
//! let store = MemoryStore::new();
//! let engine = Arc::new(Engine::new("device-a", applier, store, EngineConfig::default()));
//! engine.initialize().await?;
//! engine.spawn_change_listener();
//! engine.record("todo.created", serde_json::json!({ "title": "ship it" })).await?;
//! engine.sync().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] - layered configuration, `EngineConfig` with `apply_env_vars`
//! - [`engine`] - clock, shard manager, store/applier contracts, and the
//!   engine's `initialize`/`record`/`sync`/`gc` operations

pub mod config;
pub mod engine;

/// A toy `Applier` fixture (`TodoApplier`) used by this crate's own
/// integration/benchmark tests and available to downstream crates that
/// want a minimal worked example without writing their own. Not gated
/// behind `#[cfg(test)]` because `tests/*.rs` integration tests compile
/// against the library as an ordinary dependency and would not see a
/// `cfg(test)`-only module.
pub mod testing;

pub use config::EngineConfig;
pub use engine::{Applier, Engine, EngineError, EngineResult, MemoryStore, StoreAdapter};
