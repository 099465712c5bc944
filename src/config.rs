//! Configuration for elohim-migrate
//!
//! Loaded from an optional TOML file, then overridden field by field from the
//! command line / environment, then validated once before anything runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::SourceKind;
use crate::error::{MigrateError, Result};

/// Top-level configuration
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Durable record of completed content addresses
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Ledger node connection and signing identity
#[derive(Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// WebSocket JSON-RPC endpoint, e.g. `ws://localhost:9944`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Hex-encoded 32-byte ed25519 seed
    #[serde(default)]
    pub signing_seed: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound on waiting for a terminal status per order
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

/// IPFS gateway used to resolve file sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Kubo RPC base URL, e.g. `http://localhost:5001`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

/// Catalog database and the tables to read from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// SQLite database file
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_sources")]
    pub sources: Vec<CatalogSource>,
}

/// One catalog table that references content addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub kind: SourceKind,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_cid_column")]
    pub cid_column: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_confirmation_timeout() -> u64 {
    300
}

fn default_gateway_timeout() -> u64 {
    60
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_cid_column() -> String {
    "cid".to_string()
}

fn default_sources() -> Vec<CatalogSource> {
    vec![
        CatalogSource {
            kind: SourceKind::Media,
            table: "media".to_string(),
            id_column: default_id_column(),
            cid_column: default_cid_column(),
        },
        CatalogSource {
            kind: SourceKind::Clip,
            table: "clips".to_string(),
            id_column: default_id_column(),
            cid_column: default_cid_column(),
        },
    ]
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            signing_seed: None,
            request_timeout_secs: default_request_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            sources: default_sources(),
        }
    }
}

// The seed is a secret; keep it out of logs and panics.
impl std::fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("endpoint", &self.endpoint)
            .field("signing_seed", &self.signing_seed.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("checkpoint_path", &self.checkpoint_path)
            .field("ledger", &self.ledger)
            .field("gateway", &self.gateway)
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| MigrateError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Validate the fields needed by every stage.
    pub fn validate(&self) -> Result<()> {
        self.validate_local()?;

        let endpoint = required(&self.ledger.endpoint, "ledger.endpoint")?;
        // The socket is built without TLS; front a remote node with a local tunnel.
        if !endpoint.starts_with("ws://") {
            return Err(MigrateError::Config(format!(
                "ledger.endpoint must be a ws:// URL, got {}",
                endpoint
            )));
        }

        let seed = required(&self.ledger.signing_seed, "ledger.signing_seed")?;
        decode_seed(seed)?;

        let url = required(&self.gateway.url, "gateway.url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MigrateError::Config(format!(
                "gateway.url must be an http:// or https:// URL, got {}",
                url
            )));
        }

        if self.ledger.confirmation_timeout_secs == 0 {
            return Err(MigrateError::Config(
                "ledger.confirmation_timeout_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Validate only what the offline commands (`plan`, `status`) need.
    pub fn validate_local(&self) -> Result<()> {
        required(&self.checkpoint_path, "checkpoint_path")?;
        required(&self.catalog.path, "catalog.path")?;

        if self.catalog.sources.is_empty() {
            return Err(MigrateError::Config("catalog.sources must not be empty".into()));
        }
        for source in &self.catalog.sources {
            for name in [&source.table, &source.id_column, &source.cid_column] {
                if !is_identifier(name) {
                    return Err(MigrateError::Config(format!(
                        "catalog source {:?}: {:?} is not a plain SQL identifier",
                        source.kind, name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checkpoint path; call after `validate_local`.
    pub fn checkpoint_path(&self) -> Result<&Path> {
        required(&self.checkpoint_path, "checkpoint_path").map(|p| p.as_path())
    }

    /// Catalog path; call after `validate_local`.
    pub fn catalog_path(&self) -> Result<&Path> {
        required(&self.catalog.path, "catalog.path").map(|p| p.as_path())
    }

    pub fn ledger_endpoint(&self) -> Result<&str> {
        required(&self.ledger.endpoint, "ledger.endpoint").map(|s| s.as_str())
    }

    pub fn gateway_url(&self) -> Result<&str> {
        required(&self.gateway.url, "gateway.url").map(|s| s.as_str())
    }

    pub fn signing_seed(&self) -> Result<[u8; 32]> {
        decode_seed(required(&self.ledger.signing_seed, "ledger.signing_seed")?)
    }
}

fn required<'a, T>(value: &'a Option<T>, name: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| MigrateError::Config(format!("missing required setting {}", name)))
}

/// Decode a hex seed, with or without a `0x` prefix.
pub fn decode_seed(seed: &str) -> Result<[u8; 32]> {
    let hex_part = seed.trim().trim_start_matches("0x");
    let bytes = hex::decode(hex_part)
        .map_err(|e| MigrateError::Config(format!("ledger.signing_seed is not hex: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        MigrateError::Config(format!(
            "ledger.signing_seed must be 32 bytes, got {}",
            b.len()
        ))
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
