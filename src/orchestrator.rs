//! Migration orchestrator
//!
//! Drives the work list one item at a time: resolve size, submit, wait for
//! the outcome, checkpoint on success. Only one order is ever in flight
//! because every order is signed by the same identity and nonce sequence.
//!
//! No per-item failure stops the run. Every discovered address ends up in
//! exactly one bucket of the [`RunSummary`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::confirmation::SubmissionOutcome;
use crate::gateway::{ContentNetwork, SizeResolver};
use crate::ledger::Ledger;
use crate::submitter::OrderSubmitter;
use crate::work_list::{WorkItem, WorkList};

/// An item that did not migrate this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub cid: String,
    pub reason: String,
    /// True when a retry from the same identity will not help
    pub needs_operator: bool,
}

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    Migrated { block: String, checkpointed: bool },
    Failed(FailedItem),
}

/// Counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Confirmed on chain this run
    pub succeeded: usize,
    /// Attempted this run and not confirmed
    pub failed: usize,
    /// Invalid content addresses in the catalog
    pub skipped: usize,
    /// Found in the checkpoint store before the run
    pub already_migrated: usize,
    /// Left for a later run by `--limit`
    pub deferred: usize,
    /// Confirmed on chain but the checkpoint write failed
    pub checkpoint_failures: usize,
    pub failures: Vec<FailedItem>,
}

impl RunSummary {
    /// Seed the counters that are known before any item is processed.
    pub fn for_work_list(work_list: &WorkList) -> Self {
        Self {
            skipped: work_list.invalid.len(),
            already_migrated: work_list.already_migrated.len(),
            deferred: work_list.deferred,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &ItemResult) {
        match result {
            ItemResult::Migrated { checkpointed, .. } => {
                self.succeeded += 1;
                if !checkpointed {
                    self.checkpoint_failures += 1;
                }
            }
            ItemResult::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure.clone());
            }
        }
    }

    /// Distinct addresses discovered in the catalog.
    pub fn discovered(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.already_migrated + self.deferred
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Migration summary")?;
        writeln!(f, "  migrated this run:  {}", self.succeeded)?;
        writeln!(f, "  already migrated:   {}", self.already_migrated)?;
        writeln!(f, "  skipped (invalid):  {}", self.skipped)?;
        writeln!(f, "  failed this run:    {}", self.failed)?;
        if self.deferred > 0 {
            writeln!(f, "  deferred (limit):   {}", self.deferred)?;
        }
        if self.checkpoint_failures > 0 {
            writeln!(f, "  NOT checkpointed:   {}", self.checkpoint_failures)?;
        }
        for failure in &self.failures {
            let tag = if failure.needs_operator { "needs operator" } else { "will retry" };
            writeln!(f, "  - {} [{}]: {}", failure.cid, tag, failure.reason)?;
        }
        Ok(())
    }
}

/// Sequential migration driver.
pub struct Orchestrator {
    resolver: SizeResolver,
    submitter: OrderSubmitter,
    checkpoint: CheckpointStore,
}

impl Orchestrator {
    pub fn new(
        network: Arc<dyn ContentNetwork>,
        ledger: Arc<dyn Ledger>,
        checkpoint: CheckpointStore,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            resolver: SizeResolver::new(network),
            submitter: OrderSubmitter::new(ledger, confirmation_timeout),
            checkpoint,
        }
    }

    /// Process every item in order and report what happened.
    pub async fn run(&mut self, work_list: WorkList) -> RunSummary {
        let mut summary = RunSummary::for_work_list(&work_list);
        let total = work_list.items.len();

        info!(total = total, "Starting migration run");

        for (index, mut item) in work_list.items.into_iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, item.content_address);
            let result = self.process_item(&mut item).await;
            summary.record(&result);
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            already_migrated = summary.already_migrated,
            "Migration run finished"
        );
        summary
    }

    /// Migrate one item. Never returns an error; failures are part of the
    /// result.
    pub async fn process_item(&mut self, item: &mut WorkItem) -> ItemResult {
        let cid = item.content_address.clone();

        let size = match self.resolver.resolve_size(&cid).await {
            Ok(size) => size,
            Err(e) => {
                warn!(cid = %cid, error = %e, "Cannot resolve size, skipping this run");
                return ItemResult::Failed(FailedItem {
                    cid,
                    reason: e.to_string(),
                    needs_operator: false,
                });
            }
        };
        item.byte_size = Some(size);

        match self.submitter.submit(&cid, size).await {
            SubmissionOutcome::Success { block } => {
                let checkpointed = match self.checkpoint.mark_complete(&cid).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(
                            cid = %cid,
                            block = %block,
                            error = %e,
                            "ORDER CONFIRMED BUT CHECKPOINT WRITE FAILED; next run will resubmit this file"
                        );
                        false
                    }
                };
                info!(cid = %cid, size = size, block = %block, "Migrated");
                ItemResult::Migrated { block, checkpointed }
            }
            SubmissionOutcome::RecoverableFailure(reason) => {
                warn!(cid = %cid, size = size, reason = %reason, "Order not confirmed, will retry next run");
                ItemResult::Failed(FailedItem {
                    cid,
                    reason,
                    needs_operator: false,
                })
            }
            SubmissionOutcome::FatalFailure(reason) => {
                error!(cid = %cid, size = size, reason = %reason, "Order rejected, operator action required");
                ItemResult::Failed(FailedItem {
                    cid,
                    reason,
                    needs_operator: true,
                })
            }
        }
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn into_checkpoint(self) -> CheckpointStore {
        self.checkpoint
    }
}
