//! Errors crossing the adapter/engine boundary, and the engine's own
//! failure surface. See §7 of the design: every variant here maps to one
//! row of the error-handling table.

use thiserror::Error;

/// Errors a `StoreAdapter` implementation returns. The engine recognises
/// `QuotaExceeded` by this dedicated variant — never by matching on
/// `to_string()`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store write would exceed total quota")]
    QuotaExceeded,
    #[error("store adapter failure: {0}")]
    Other(String),
}

/// The engine's public error type. Every `Engine` method returns
/// `EngineResult<T>`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("an operation is already in flight")]
    Busy,

    #[error("event would exceed the {MAX_KEY_SIZE} byte per-key budget (estimated {size} bytes)", MAX_KEY_SIZE = super::types::MAX_KEY_SIZE)]
    EventTooLarge { size: usize },

    #[error("peer {peer} advertises protocol version {found}, this engine requires at least {required}")]
    UnsupportedVersion {
        peer: String,
        found: u32,
        required: u32,
    },

    #[error("store adapter failure: {0}")]
    Store(#[from] StoreError),

    #[error("failed to decode stored record at key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("engine has not been initialized")]
    NotInitialized,
}

pub type EngineResult<T> = Result<T, EngineError>;
