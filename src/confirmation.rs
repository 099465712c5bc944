//! Order confirmation state machine
//!
//! Folds the push-based status stream of one submitted order into exactly
//! one [`SubmissionOutcome`].
//!
//! ```text
//! Submitted ──► Broadcast ──► InBlock ──┬──► Finalized      (ExtrinsicSuccess)
//!     │             │            │      └──► ChainRejected  (ExtrinsicFailed)
//!     └─────────────┴────────────┴────────► StreamError     (transport/pool error)
//! ```
//!
//! Inclusion in a block with `ExtrinsicSuccess` is enough to call the order
//! a success; deeper finality is not awaited. A block whose events carry
//! neither success nor failure leaves the machine in `InBlock` until a later
//! update brings them. Once terminal, further events are ignored and
//! [`await_outcome`] stops polling the stream and drops it.

use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ledger::{ChainEvent, ChainRejection, StatusEvent};

/// Where a submission currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationState {
    Submitted,
    Broadcast,
    InBlock { block: String },
    Finalized { block: String },
    ChainRejected(ChainRejection),
    StreamError(String),
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Finalized { .. }
                | ConfirmationState::ChainRejected(_)
                | ConfirmationState::StreamError(_)
        )
    }
}

/// Final result of one submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Included in `block` with `ExtrinsicSuccess`
    Success { block: String },
    /// Worth retrying on a later run
    RecoverableFailure(String),
    /// Will fail again from this identity; needs an operator
    FatalFailure(String),
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success { .. })
    }
}

/// State machine for a single submission.
#[derive(Debug)]
pub struct Confirmation {
    state: ConfirmationState,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self::new()
    }
}

impl Confirmation {
    pub fn new() -> Self {
        Self {
            state: ConfirmationState::Submitted,
        }
    }

    pub fn state(&self) -> &ConfirmationState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Feed one status update. Returns the outcome on the transition into a
    /// terminal state, and `None` otherwise (including every call after that).
    pub fn apply(&mut self, event: StatusEvent) -> Option<SubmissionOutcome> {
        if self.is_terminal() {
            debug!(state = ?self.state, "Ignoring status after terminal state");
            return None;
        }

        match event {
            StatusEvent::Broadcast => {
                if self.state == ConfirmationState::Submitted {
                    self.state = ConfirmationState::Broadcast;
                }
                None
            }
            StatusEvent::InBlock { block, events } | StatusEvent::Finalized { block, events } => {
                self.inspect_block(block, &events)
            }
            StatusEvent::Error(reason) => {
                self.state = ConfirmationState::StreamError(reason.clone());
                Some(SubmissionOutcome::RecoverableFailure(format!(
                    "ledger stream error: {}",
                    reason
                )))
            }
        }
    }

    fn inspect_block(&mut self, block: String, events: &[ChainEvent]) -> Option<SubmissionOutcome> {
        // A failure event wins if a block somehow reports both.
        if let Some(rejection) = events.iter().find_map(ChainEvent::rejection) {
            let reason = format!("rejected in block {}: {}", block, rejection);
            let outcome = if rejection.is_transient() {
                SubmissionOutcome::RecoverableFailure(reason)
            } else {
                SubmissionOutcome::FatalFailure(reason)
            };
            self.state = ConfirmationState::ChainRejected(rejection);
            return Some(outcome);
        }

        if events.iter().any(ChainEvent::is_extrinsic_success) {
            self.state = ConfirmationState::Finalized { block: block.clone() };
            return Some(SubmissionOutcome::Success { block });
        }

        debug!(block = %block, events = events.len(), "In block, outcome events not seen yet");
        self.state = ConfirmationState::InBlock { block };
        None
    }

    /// The stream ended (or timed out) before a terminal state.
    pub fn abandon(&mut self, reason: &str) -> SubmissionOutcome {
        let reason = match &self.state {
            ConfirmationState::InBlock { block } => format!("{} while in block {}", reason, block),
            _ => reason.to_string(),
        };
        self.state = ConfirmationState::StreamError(reason.clone());
        SubmissionOutcome::RecoverableFailure(reason)
    }
}

/// Consume `stream` until a terminal outcome, the end of the stream, or
/// `timeout`. The stream is dropped on return, which detaches it.
pub async fn await_outcome<S>(mut stream: S, timeout: Duration) -> SubmissionOutcome
where
    S: Stream<Item = StatusEvent> + Unpin,
{
    let mut machine = Confirmation::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(event) => {
                    if let Some(outcome) = machine.apply(event) {
                        return outcome;
                    }
                }
                None => {
                    warn!(state = ?machine.state(), "Status stream ended without a terminal status");
                    return machine.abandon("status stream ended");
                }
            },
            _ = &mut deadline => {
                warn!(state = ?machine.state(), timeout = ?timeout, "Gave up waiting for confirmation");
                return machine.abandon(&format!("no terminal status within {:?}", timeout));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const LONG: Duration = Duration::from_secs(60);

    fn in_block(events: Vec<ChainEvent>) -> StatusEvent {
        StatusEvent::InBlock {
            block: "0xb1".into(),
            events,
        }
    }

    #[test]
    fn test_broadcast_is_not_terminal() {
        let mut machine = Confirmation::new();
        assert_eq!(machine.apply(StatusEvent::Broadcast), None);
        assert_eq!(machine.state(), &ConfirmationState::Broadcast);
        assert_eq!(machine.apply(StatusEvent::Broadcast), None);
    }

    #[test]
    fn test_success_in_block() {
        let mut machine = Confirmation::new();
        machine.apply(StatusEvent::Broadcast);
        let outcome = machine.apply(in_block(vec![ChainEvent::extrinsic_success()]));
        assert_eq!(outcome, Some(SubmissionOutcome::Success { block: "0xb1".into() }));
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_nothing_after_terminal() {
        let mut machine = Confirmation::new();
        assert!(machine.apply(in_block(vec![ChainEvent::extrinsic_success()])).is_some());
        assert_eq!(machine.apply(StatusEvent::Error("late".into())), None);
        assert_eq!(
            machine.apply(in_block(vec![ChainEvent::extrinsic_failed(json!("BadOrigin"))])),
            None
        );
        assert!(matches!(machine.state(), ConfirmationState::Finalized { .. }));
    }

    #[test]
    fn test_waits_for_events_in_later_update() {
        let mut machine = Confirmation::new();
        assert_eq!(machine.apply(in_block(vec![])), None);
        assert_eq!(machine.state(), &ConfirmationState::InBlock { block: "0xb1".into() });
        let outcome = machine.apply(StatusEvent::Finalized {
            block: "0xb1".into(),
            events: vec![ChainEvent::extrinsic_success()],
        });
        assert!(outcome.unwrap().is_success());
    }

    #[test]
    fn test_permanent_rejection_is_fatal() {
        let mut machine = Confirmation::new();
        let failed = ChainEvent::extrinsic_failed(json!({
            "module": {"section": "market", "name": "FileSizeNotCorrect", "docs": ["Size mismatch"]}
        }));
        match machine.apply(in_block(vec![failed])) {
            Some(SubmissionOutcome::FatalFailure(reason)) => {
                assert!(reason.contains("market.FileSizeNotCorrect: Size mismatch"), "{}", reason)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(machine.state(), ConfirmationState::ChainRejected(r) if r.module == "market"));
    }

    #[test]
    fn test_balance_rejection_is_recoverable() {
        let mut machine = Confirmation::new();
        let failed = ChainEvent::extrinsic_failed(json!({
            "module": {"section": "market", "name": "InsufficientCurrency", "docs": []}
        }));
        assert!(matches!(
            machine.apply(in_block(vec![failed])),
            Some(SubmissionOutcome::RecoverableFailure(_))
        ));
    }

    #[test]
    fn test_failure_wins_over_success_in_same_block() {
        let mut machine = Confirmation::new();
        let outcome = machine.apply(in_block(vec![
            ChainEvent::extrinsic_success(),
            ChainEvent::extrinsic_failed(json!("BadOrigin")),
        ]));
        assert!(matches!(outcome, Some(SubmissionOutcome::FatalFailure(_))));
    }

    #[test]
    fn test_stream_error_is_recoverable() {
        let mut machine = Confirmation::new();
        machine.apply(StatusEvent::Broadcast);
        assert!(matches!(
            machine.apply(StatusEvent::Error("transaction dropped".into())),
            Some(SubmissionOutcome::RecoverableFailure(_))
        ));
        assert!(matches!(machine.state(), ConfirmationState::StreamError(_)));
    }

    #[tokio::test]
    async fn test_stops_polling_after_terminal() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let events = vec![
            StatusEvent::Broadcast,
            in_block(vec![ChainEvent::extrinsic_success()]),
            StatusEvent::Error("should never be seen".into()),
            in_block(vec![ChainEvent::extrinsic_failed(json!("BadOrigin"))]),
        ];
        let stream = stream::iter(events).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = await_outcome(stream, LONG).await;
        assert_eq!(outcome, SubmissionOutcome::Success { block: "0xb1".into() });
        assert_eq!(polled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_end_without_outcome() {
        let stream = stream::iter(vec![StatusEvent::Broadcast, in_block(vec![])]);
        match await_outcome(stream, LONG).await {
            SubmissionOutcome::RecoverableFailure(reason) => {
                assert!(reason.contains("stream ended"), "{}", reason);
                assert!(reason.contains("0xb1"), "{}", reason);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable() {
        let stream = stream::iter(vec![StatusEvent::Broadcast]).chain(stream::pending());
        let outcome = await_outcome(stream, Duration::from_millis(20)).await;
        assert!(matches!(outcome, SubmissionOutcome::RecoverableFailure(_)));
    }
}
