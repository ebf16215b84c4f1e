//! The three-handler capability set a host application implements to
//! plug its state model into the engine. Generalizes
//! `lithair_core::engine::Event::apply` to the optional-handler triad
//! this spec calls for: `apply_event` is required, `snapshot` and
//! `load_snapshot` default to no-ops so a bootstrap-only peer is legal.

use async_trait::async_trait;

use super::types::Event;

/// Implemented by the host application. `State` never leaves this trait
/// except as an opaque `serde_json::Value` snapshot, so the engine
/// itself never needs to know its shape.
#[async_trait]
pub trait Applier: Send + Sync {
    /// Applies one event to the host's state. Must be idempotent over the
    /// event's identity: a restart may replay an event whose effect is
    /// already folded into a loaded baseline only if that baseline does
    /// not cover it.
    async fn apply_event(&self, event: &Event);

    /// Returns the current full state as an opaque blob, for writing a
    /// new baseline. Must be safe to call at any suspension point. The
    /// default returns `None`, meaning this peer never advertises a
    /// baseline (legal, per §3's baseline lifecycle).
    async fn snapshot(&self) -> Option<serde_json::Value> {
        None
    }

    /// Replaces the host's state wholesale from a loaded baseline. Called
    /// at most once per bootstrap. The default is a no-op, meaning this
    /// peer always replays from increment 1 on bootstrap.
    async fn load_snapshot(&self, _state: serde_json::Value) {}
}
