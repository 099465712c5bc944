//! Error types for elohim-migrate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid content address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("Checkpoint store {} is unreadable: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("Failed to write checkpoint store {}: {source}", path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Size unavailable for {cid}: {reason}")]
    SizeUnavailable { cid: String, reason: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("Ledger unreachable at {endpoint}: {reason}")]
    LedgerConnect { endpoint: String, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrateError>;
