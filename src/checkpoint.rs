//! Durable record of completed migrations
//!
//! The checkpoint file is the only state that survives between runs. It is a
//! small JSON document an operator can read and diff:
//!
//! ```text
//! {
//!   "version": 1,
//!   "migrated": [
//!     { "cid": "bafkrei...", "completed_at": "2026-10-16T09:12:44Z" }
//!   ]
//! }
//! ```
//!
//! A record is only ever appended after the ledger confirmed the order.
//! Writes go to a sibling temp file which is synced and renamed over the
//! original, so a crash leaves either the old or the new document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::content_address::parse_content_address;
use crate::error::{MigrateError, Result};

const FORMAT_VERSION: u32 = 1;

/// One successfully migrated content address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub cid: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    migrated: Vec<CompletionRecord>,
}

/// Append-only set of completed content addresses, persisted to disk.
pub struct CheckpointStore {
    path: PathBuf,
    records: Vec<CompletionRecord>,
    completed: HashSet<String>,
}

impl CheckpointStore {
    /// Load the store. A missing file is an empty store; a file that exists
    /// but cannot be read or parsed is an error.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No checkpoint store yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(MigrateError::CheckpointCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let file: CheckpointFile =
            serde_json::from_slice(&bytes).map_err(|e| MigrateError::CheckpointCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if file.version != FORMAT_VERSION {
            return Err(MigrateError::CheckpointCorrupt {
                path,
                reason: format!("unsupported version {}", file.version),
            });
        }

        // Records may have been written by hand or by another tool; key them
        // the same way the work list does.
        let mut store = Self::empty(path);
        for mut record in file.migrated {
            record.cid = parse_content_address(&record.cid).map_err(|e| {
                MigrateError::CheckpointCorrupt {
                    path: store.path.clone(),
                    reason: e.to_string(),
                }
            })?;
            if store.completed.insert(record.cid.clone()) {
                store.records.push(record);
            }
        }

        info!(
            path = %store.path.display(),
            completed = store.records.len(),
            "Loaded checkpoint store"
        );
        Ok(store)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            records: Vec::new(),
            completed: HashSet::new(),
        }
    }

    /// True if `cid` was marked complete in this or any earlier run.
    pub fn has(&self, cid: &str) -> bool {
        self.completed.contains(cid)
    }

    /// Record `cid` as migrated and persist before returning.
    ///
    /// Returns `Ok(false)` when it was already recorded. On a write failure
    /// the in-memory state is rolled back so `has` matches what is on disk.
    pub async fn mark_complete(&mut self, cid: &str) -> Result<bool> {
        if self.has(cid) {
            debug!(cid = %cid, "Already checkpointed");
            return Ok(false);
        }

        self.completed.insert(cid.to_string());
        self.records.push(CompletionRecord {
            cid: cid.to_string(),
            completed_at: Utc::now(),
        });

        if let Err(e) = self.persist().await {
            self.records.pop();
            self.completed.remove(cid);
            return Err(e);
        }

        debug!(cid = %cid, total = self.records.len(), "Checkpoint written");
        Ok(true)
    }

    async fn persist(&self) -> Result<()> {
        let document = CheckpointFile {
            version: FORMAT_VERSION,
            migrated: self.records.clone(),
        };
        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');

        let write_err = |source: std::io::Error| MigrateError::StoreWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await.map_err(write_err)?;
        file.write_all(&bytes).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in completion order.
    pub fn records(&self) -> &[CompletionRecord] {
        &self.records
    }

    pub fn last_completed(&self) -> Option<&CompletionRecord> {
        self.records.iter().max_by_key(|r| r.completed_at)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
