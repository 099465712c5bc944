//! Turns raw catalog rows into the ordered list of files to migrate
//!
//! Pure: no network or ledger access. Steps, in order:
//!
//! 1. drop rows whose CID does not parse (logged, counted as skipped)
//! 2. collapse rows sharing a CID, keeping the first-seen position
//! 3. drop CIDs already present in the checkpoint store
//!
//! The result keeps catalog discovery order so reruns are reproducible.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::catalog::CatalogItem;
use crate::checkpoint::CheckpointStore;
use crate::content_address::parse_content_address;

/// A distinct content address to migrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub content_address: String,
    /// Filled in by the size resolver
    pub byte_size: Option<u64>,
}

impl WorkItem {
    pub fn new(content_address: impl Into<String>) -> Self {
        Self {
            content_address: content_address.into(),
            byte_size: None,
        }
    }
}

/// Output of [`WorkListBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct WorkList {
    /// Addresses still to migrate, in discovery order
    pub items: Vec<WorkItem>,
    /// Distinct raw addresses that failed validation
    pub invalid: Vec<String>,
    /// Distinct valid addresses already in the checkpoint store
    pub already_migrated: Vec<String>,
    /// Rows dropped because an earlier row had the same address
    pub duplicate_rows: usize,
    /// Items cut by [`WorkList::truncate`], left for a later run
    pub deferred: usize,
}

impl WorkList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep the first `limit` items and return how many were deferred.
    pub fn truncate(&mut self, limit: usize) -> usize {
        let deferred = self.items.len().saturating_sub(limit);
        self.items.truncate(limit);
        self.deferred += deferred;
        deferred
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.content_address.as_str()).collect()
    }
}

/// Builds a [`WorkList`] from catalog rows and the checkpoint store.
pub struct WorkListBuilder;

impl WorkListBuilder {
    pub fn build(catalog_items: &[CatalogItem], checkpoint: &CheckpointStore) -> WorkList {
        let mut list = WorkList::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut seen_invalid: HashSet<String> = HashSet::new();

        for item in catalog_items {
            let cid = match parse_content_address(&item.content_address) {
                Ok(cid) => cid,
                Err(e) => {
                    let raw = item.content_address.trim().to_string();
                    if seen_invalid.insert(raw.clone()) {
                        warn!(
                            source = %item.source_kind,
                            id = %item.identifier,
                            error = %e,
                            "Skipping catalog row with invalid content address"
                        );
                        list.invalid.push(raw);
                    }
                    continue;
                }
            };

            if !seen.insert(cid.clone()) {
                debug!(
                    cid = %cid,
                    source = %item.source_kind,
                    id = %item.identifier,
                    "Duplicate content address, keeping first occurrence"
                );
                list.duplicate_rows += 1;
                continue;
            }

            if checkpoint.has(&cid) {
                list.already_migrated.push(cid);
                continue;
            }

            list.items.push(WorkItem::new(cid));
        }

        info!(
            rows = catalog_items.len(),
            to_migrate = list.items.len(),
            already_migrated = list.already_migrated.len(),
            invalid = list.invalid.len(),
            duplicates = list.duplicate_rows,
            "Built work list"
        );
        list
    }
}
