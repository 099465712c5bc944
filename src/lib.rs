//! Elohim Migrate - move catalogued IPFS content into an on-chain storage market
//!
//! For every file referenced by the catalog, resolve its size on IPFS, place a
//! storage order on the ledger, wait for the order to land in a block, and
//! record the CID as done. Runs can be killed and restarted at any point; the
//! checkpoint file is the only source of truth for what is finished.
//!
//! ## Pipeline
//!
//! ```text
//! catalog (SQLite) ──► WorkListBuilder ──► Orchestrator ──┬─► SizeResolver (IPFS)
//!                          ▲                              ├─► OrderSubmitter ──► Ledger (WS JSON-RPC)
//!                          │                              │        └─ Confirmation state machine
//!                   CheckpointStore ◄──── mark_complete ◄─┘
//! ```
//!
//! ## Files
//!
//! ```text
//! /var/lib/elohim-migrate/
//! ├── catalog.db        # application catalog (read-only)
//! ├── migrated.json     # checkpoint store
//! └── config.toml       # optional configuration
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod confirmation;
pub mod content_address;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod submitter;
pub mod work_list;

// Re-exports
pub use catalog::{Catalog, CatalogItem, SourceKind, SqliteCatalog};
pub use checkpoint::{CheckpointStore, CompletionRecord};
pub use config::Config;
pub use confirmation::{await_outcome, Confirmation, ConfirmationState, SubmissionOutcome};
pub use error::{MigrateError, Result};
pub use gateway::{ContentNetwork, ContentStat, IpfsGateway, SizeResolver};
pub use ledger::{Ledger, OrderSigner, RpcLedger, StatusEvent, StatusStream, StorageOrder};
pub use orchestrator::{FailedItem, ItemResult, Orchestrator, RunSummary};
pub use submitter::OrderSubmitter;
pub use work_list::{WorkItem, WorkList, WorkListBuilder};
