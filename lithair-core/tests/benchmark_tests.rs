//! Benchmark tests for the replication engine.
//!
//! These tests measure throughput characteristics of `record`/`sync`/
//! `gc` to ensure we meet our performance goals; they assert generous
//! bounds (not tight ones) so they stay stable across CI hardware.

use std::time::Instant;

use lithair_core::config::EngineConfig;
use lithair_core::engine::{Engine, MemoryStore};
use lithair_core::testing::{record_payload, TodoApplier, TodoEvent};

fn engine(peer: &str, store: MemoryStore, config: EngineConfig) -> Engine<TodoApplier, MemoryStore> {
    Engine::new(peer, TodoApplier::new(), store, config)
}

#[tokio::test]
async fn benchmark_record_throughput() {
    let store = MemoryStore::new();
    let config = EngineConfig {
        baseline_threshold: 10_000,
        ..EngineConfig::default()
    };
    let a = engine("a", store, config);
    a.initialize().await.unwrap();

    let start = Instant::now();
    for i in 0..500 {
        let event = TodoEvent::Created {
            id: format!("t{i}"),
            title: format!("benchmark todo {i}"),
        };
        let (kind, data) = record_payload(&event);
        a.record(kind, data).await.unwrap();
    }
    let elapsed = start.elapsed();

    println!("recorded 500 events in {elapsed:?}");
    assert!(
        elapsed.as_secs() < 5,
        "recording 500 events took unexpectedly long: {elapsed:?}"
    );
    assert_eq!(a.applier().state().todos.len(), 500);
}

#[tokio::test]
async fn benchmark_sync_throughput_across_peers() {
    let store = MemoryStore::new();
    let config = EngineConfig::default();

    let writer = engine("writer", store.clone(), config.clone());
    writer.initialize().await.unwrap();
    for i in 0..200 {
        let event = TodoEvent::Created {
            id: format!("t{i}"),
            title: format!("todo {i}"),
        };
        let (kind, data) = record_payload(&event);
        writer.record(kind, data).await.unwrap();
    }

    let reader = engine("reader", store, config);
    reader.initialize().await.unwrap();

    let start = Instant::now();
    let report = reader.sync().await.unwrap();
    let elapsed = start.elapsed();

    println!("synced {} events in {elapsed:?}", report.events_applied);
    assert_eq!(report.events_applied, 200);
    assert!(
        elapsed.as_secs() < 5,
        "syncing 200 events took unexpectedly long: {elapsed:?}"
    );
    assert_eq!(reader.applier().state().todos.len(), 200);
}

#[tokio::test]
async fn benchmark_many_peers_converge() {
    let store = MemoryStore::new();
    let config = EngineConfig::default();
    let peer_count = 20;

    let mut peers = Vec::with_capacity(peer_count);
    for i in 0..peer_count {
        let peer = engine(&format!("peer{i}"), store.clone(), config.clone());
        peer.initialize().await.unwrap();
        let event = TodoEvent::Created {
            id: format!("from-peer{i}"),
            title: "one todo each".to_string(),
        };
        let (kind, data) = record_payload(&event);
        peer.record(kind, data).await.unwrap();
        peers.push(peer);
    }

    let start = Instant::now();
    for peer in &peers {
        peer.sync().await.unwrap();
    }
    let elapsed = start.elapsed();

    println!("{peer_count} peers converged in {elapsed:?}");
    for peer in &peers {
        assert_eq!(peer.applier().state().todos.len(), peer_count);
    }
    assert!(
        elapsed.as_secs() < 10,
        "converging {peer_count} peers took unexpectedly long: {elapsed:?}"
    );
}

#[tokio::test]
async fn benchmark_gc_after_sustained_writes() {
    let store = MemoryStore::new();
    let config = EngineConfig {
        baseline_threshold: 25,
        gc_frequency: 3,
        ..EngineConfig::default()
    };

    let a = engine("a", store.clone(), config.clone());
    a.initialize().await.unwrap();
    let b = engine("b", store, config);
    b.initialize().await.unwrap();

    let start = Instant::now();
    for i in 0..100 {
        let event = TodoEvent::Created {
            id: format!("t{i}"),
            title: "todo".to_string(),
        };
        let (kind, data) = record_payload(&event);
        a.record(kind, data).await.unwrap();
        if i % 10 == 0 {
            b.sync().await.unwrap();
        }
    }
    let elapsed = start.elapsed();

    println!("100 records with interleaved syncs/GC in {elapsed:?}");
    assert!(
        elapsed.as_secs() < 10,
        "sustained writes with GC took unexpectedly long: {elapsed:?}"
    );
}
