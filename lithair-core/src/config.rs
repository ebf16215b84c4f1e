//! Engine configuration — the five tunables of §6/§12, each with a
//! default, following this codebase's layered-config idiom: a plain
//! `serde`-derived struct, a `Default` impl supplying the spec's
//! defaults, and an `apply_env_vars` hook consulted after construction
//! so a deployment can override without recompiling.

use std::env;

use serde::{Deserialize, Serialize};

/// Tunable knobs the engine consults; every field has a spec-mandated
/// default so `EngineConfig::default()` alone is a legal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Events appended between baseline refreshes.
    pub baseline_threshold: u32,
    /// Syncs run between garbage-collection passes.
    pub gc_frequency: u32,
    /// Whether GC evicts peers inactive longer than `inactive_device_timeout_ms`.
    pub remove_inactive_devices: bool,
    /// How long a peer may go without a productive sync before GC evicts it.
    pub inactive_device_timeout_ms: u64,
    /// Verbose tracing via `log::debug!`/`log::trace!`. Never changes
    /// control flow, only what gets logged.
    pub debug: bool,
}

const DEFAULT_BASELINE_THRESHOLD: u32 = 15;
const DEFAULT_GC_FREQUENCY: u32 = 10;
const DEFAULT_REMOVE_INACTIVE_DEVICES: bool = false;
const DEFAULT_INACTIVE_DEVICE_TIMEOUT_MS: u64 = 60 * 24 * 60 * 60 * 1000;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline_threshold: DEFAULT_BASELINE_THRESHOLD,
            gc_frequency: DEFAULT_GC_FREQUENCY,
            remove_inactive_devices: DEFAULT_REMOVE_INACTIVE_DEVICES,
            inactive_device_timeout_ms: DEFAULT_INACTIVE_DEVICE_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Applies `LITHAIR_*` environment overrides on top of whatever
    /// values are already set, mirroring this codebase's `RS_*`
    /// supersedence convention elsewhere.
    pub fn apply_env_vars(&mut self) {
        if let Ok(value) = env::var("LITHAIR_BASELINE_THRESHOLD") {
            if let Ok(parsed) = value.parse() {
                self.baseline_threshold = parsed;
            }
        }
        if let Ok(value) = env::var("LITHAIR_GC_FREQUENCY") {
            if let Ok(parsed) = value.parse() {
                self.gc_frequency = parsed;
            }
        }
        if let Ok(value) = env::var("LITHAIR_REMOVE_INACTIVE_DEVICES") {
            self.remove_inactive_devices = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("LITHAIR_INACTIVE_DEVICE_TIMEOUT_MS") {
            if let Ok(parsed) = value.parse() {
                self.inactive_device_timeout_ms = parsed;
            }
        }
        if let Ok(value) = env::var("LITHAIR_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }
}
