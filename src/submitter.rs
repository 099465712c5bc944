//! Storage order submission
//!
//! Builds the order for a resolved file, hands it to the ledger and waits
//! for the confirmation state machine to settle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::confirmation::{await_outcome, SubmissionOutcome};
use crate::ledger::{Ledger, StorageOrder};

pub struct OrderSubmitter {
    ledger: Arc<dyn Ledger>,
    confirmation_timeout: Duration,
}

impl OrderSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>, confirmation_timeout: Duration) -> Self {
        Self {
            ledger,
            confirmation_timeout,
        }
    }

    /// Submit one order and wait for its single terminal outcome.
    ///
    /// A submission that fails before any status arrives is recoverable.
    pub async fn submit(&self, cid: &str, byte_size: u64) -> SubmissionOutcome {
        let order = StorageOrder::new(cid, byte_size);

        let stream = match self.ledger.submit_order(&order).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(cid = %cid, error = %e, "Order submission failed");
                return SubmissionOutcome::RecoverableFailure(format!("submission failed: {}", e));
            }
        };

        debug!(cid = %cid, size = byte_size, "Order submitted, awaiting confirmation");
        await_outcome(stream, self.confirmation_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MigrateError, Result};
    use crate::ledger::{ChainEvent, StatusEvent, StatusStream};
    use async_trait::async_trait;
    use futures_util::{stream, StreamExt};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLedger {
        orders: Mutex<Vec<StorageOrder>>,
        fail: bool,
    }

    #[async_trait]
    impl Ledger for RecordingLedger {
        async fn submit_order(&self, order: &StorageOrder) -> Result<StatusStream> {
            self.orders.lock().unwrap().push(order.clone());
            if self.fail {
                return Err(MigrateError::Ledger("connection reset".into()));
            }
            Ok(stream::iter(vec![
                StatusEvent::Broadcast,
                StatusEvent::InBlock {
                    block: "0x01".into(),
                    events: vec![ChainEvent::extrinsic_success()],
                },
            ])
            .boxed())
        }
    }

    #[tokio::test]
    async fn test_submits_verbatim_order() {
        let ledger = Arc::new(RecordingLedger::default());
        let submitter = OrderSubmitter::new(ledger.clone(), Duration::from_secs(5));

        let outcome = submitter.submit("bafy-x", 2048).await;
        assert_eq!(outcome, SubmissionOutcome::Success { block: "0x01".into() });

        let orders = ledger.orders.lock().unwrap();
        assert_eq!(orders.as_slice(), &[StorageOrder::new("bafy-x", 2048)]);
        assert_eq!(orders[0].tip, 0);
        assert!(orders[0].memo.is_empty());
    }

    #[tokio::test]
    async fn test_submission_error_is_recoverable() {
        let ledger = Arc::new(RecordingLedger {
            fail: true,
            ..Default::default()
        });
        let submitter = OrderSubmitter::new(ledger, Duration::from_secs(5));

        match submitter.submit("bafy-x", 2048).await {
            SubmissionOutcome::RecoverableFailure(reason) => assert!(reason.contains("connection reset")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
