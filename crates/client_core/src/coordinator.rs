//! Submit, confirm, reconcile pipeline for state-changing requests.
//!
//! `Idle -> Submitting -> AwaitingConfirmation -> {Applying, Failed} -> Idle`.
//! At most one operation per identity is past `Idle` at any time. The guard
//! is the state itself, checked and set under one short lock before any
//! remote call is made.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::{
    domain::{Candidate, CandidateId, OperationPayload, PendingOperation, TxState},
    error::{ErrorKind, VotingError},
    protocol::{ConfirmationOutcome, TxHash},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{cache::ContractStateCache, error::LedgerError, ledger::RemoteLedgerClient, ClientEvent};

#[derive(Debug, Default)]
struct Slot {
    state: TxState,
    pending: Option<PendingOperation>,
}

pub struct TransactionCoordinator {
    ledger: Arc<dyn RemoteLedgerClient>,
    cache: Arc<ContractStateCache>,
    confirmation_timeout: Duration,
    slot: Mutex<Slot>,
    events: broadcast::Sender<ClientEvent>,
}

impl TransactionCoordinator {
    pub fn new(
        ledger: Arc<dyn RemoteLedgerClient>,
        cache: Arc<ContractStateCache>,
        confirmation_timeout: Duration,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            ledger,
            cache,
            confirmation_timeout,
            slot: Mutex::new(Slot::default()),
            events,
        }
    }

    pub fn state(&self) -> TxState {
        self.lock_slot().state
    }

    pub fn pending_operation(&self) -> Option<PendingOperation> {
        self.lock_slot().pending.clone()
    }

    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    pub async fn vote(&self, candidate_id: CandidateId) -> Result<(), VotingError> {
        if !self.is_idle() {
            return Err(VotingError::busy());
        }
        self.ensure_hydrated().await?;
        if let Some(existing) = self.cache.voted_for().await {
            debug!(
                candidate_id = candidate_id.0,
                existing = existing.0,
                "coordinator: vote rejected locally, already voted"
            );
            return Err(VotingError::already_voted(existing.0));
        }
        if !self.cache.contains(candidate_id).await {
            return Err(VotingError::from(LedgerError::NotFound(candidate_id)));
        }

        let mut in_flight = self.begin(OperationPayload::Vote { candidate_id })?;
        let ledger = Arc::clone(&self.ledger);
        self.submit_and_confirm(&mut in_flight, async move {
            ledger.submit_vote(candidate_id).await
        })
        .await?;

        if let Err(err) = self.cache.apply_confirmed_vote(candidate_id).await {
            warn!(
                candidate_id = candidate_id.0,
                "coordinator: confirmed vote could not be applied locally: {err}"
            );
            self.reconcile_after_apply_failure().await;
        }
        in_flight.confirm();
        Ok(())
    }

    /// Returns the appended candidate when it could be located after the
    /// confirmation was reconciled.
    pub async fn add_candidate(&self, name: &str) -> Result<Option<Candidate>, VotingError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VotingError::new(
                ErrorKind::RemoteRejected,
                "candidate name must not be empty",
            ));
        }
        if !self.is_idle() {
            return Err(VotingError::busy());
        }
        self.ensure_hydrated().await?;

        let mut in_flight = self.begin(OperationPayload::AddCandidate {
            name: name.to_string(),
        })?;
        let ledger = Arc::clone(&self.ledger);
        let submitted_name = name.to_string();
        self.submit_and_confirm(&mut in_flight, async move {
            ledger.submit_add_candidate(&submitted_name).await
        })
        .await?;

        let candidate = match self.cache.apply_confirmed_add_candidate(name).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(
                    candidate = name,
                    "coordinator: confirmed candidate could not be applied locally: {err}"
                );
                self.reconcile_after_apply_failure().await;
                None
            }
        };
        in_flight.confirm();
        Ok(candidate)
    }

    async fn ensure_hydrated(&self) -> Result<(), VotingError> {
        if self.cache.is_hydrated().await {
            return Ok(());
        }
        self.cache.hydrate().await.map_err(VotingError::from)
    }

    /// Runs Submitting and AwaitingConfirmation. On success the operation is
    /// left in Applying; on failure it has already been finished as Failed.
    async fn submit_and_confirm<F>(
        &self,
        in_flight: &mut InFlight<'_>,
        submit: F,
    ) -> Result<(), VotingError>
    where
        F: Future<Output = Result<TxHash, LedgerError>>,
    {
        let receipt = match submit.await {
            Ok(receipt) => receipt,
            Err(err) => return Err(in_flight.fail(err.into())),
        };
        in_flight.awaiting_confirmation(receipt.clone());

        let outcome = tokio::time::timeout(
            self.confirmation_timeout,
            self.ledger.await_confirmation(&receipt),
        )
        .await;
        match outcome {
            Ok(Ok(ConfirmationOutcome::Confirmed)) => {
                in_flight.applying();
                Ok(())
            }
            Ok(Ok(ConfirmationOutcome::Reverted)) => Err(in_flight.fail(VotingError::new(
                ErrorKind::RemoteRejected,
                format!("transaction {receipt} reverted"),
            ))),
            Ok(Err(err)) => Err(in_flight.fail(err.into())),
            Err(_) => Err(in_flight.fail(VotingError::new(
                ErrorKind::Transport,
                format!(
                    "transaction {receipt} not confirmed within {:?}; its outcome will show after the next refresh",
                    self.confirmation_timeout
                ),
            ))),
        }
    }

    async fn reconcile_after_apply_failure(&self) {
        if let Err(err) = self.cache.hydrate().await {
            warn!("coordinator: re-hydrate after apply failure failed, cache kept at last read: {err}");
        }
    }

    fn begin(&self, payload: OperationPayload) -> Result<InFlight<'_>, VotingError> {
        let mut slot = self.lock_slot();
        if !slot.state.is_idle() {
            return Err(VotingError::busy());
        }
        let operation = PendingOperation::new(payload);
        info!(
            operation_id = %operation.operation_id,
            kind = ?operation.kind(),
            "coordinator: operation accepted"
        );
        slot.pending = Some(operation);
        self.transition(&mut slot, TxState::Submitting);
        Ok(InFlight {
            coordinator: self,
            confirmed: false,
            finished: false,
        })
    }

    fn transition(&self, slot: &mut Slot, next: TxState) {
        debug!(from = %slot.state, to = %next, "coordinator: state transition");
        slot.state = next;
        let _ = self.events.send(ClientEvent::TransactionStateChanged(next));
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the non-idle state for one operation. Dropping it before a terminal
/// status (the caller abandoned the wait) returns to Idle without
/// resubmitting anything: the operation finishes as Confirmed once the
/// ledger confirmed it, as Failed otherwise.
struct InFlight<'a> {
    coordinator: &'a TransactionCoordinator,
    confirmed: bool,
    finished: bool,
}

impl InFlight<'_> {
    fn awaiting_confirmation(&mut self, receipt: TxHash) {
        let coordinator = self.coordinator;
        let mut slot = coordinator.lock_slot();
        let submitted = slot.pending.as_mut().map(|operation| {
            operation.receipt = Some(receipt.clone());
            operation.clone()
        });
        coordinator.transition(&mut slot, TxState::AwaitingConfirmation);
        drop(slot);
        if let Some(operation) = submitted {
            info!(operation_id = %operation.operation_id, tx_hash = %receipt, "coordinator: awaiting confirmation");
            let _ = coordinator
                .events
                .send(ClientEvent::OperationSubmitted(operation));
        }
    }

    fn applying(&mut self) {
        self.confirmed = true;
        let coordinator = self.coordinator;
        let mut slot = coordinator.lock_slot();
        coordinator.transition(&mut slot, TxState::Applying);
    }

    fn confirm(mut self) {
        self.finish(None);
    }

    fn fail(&mut self, error: VotingError) -> VotingError {
        self.finish(Some(error.clone()));
        error
    }

    fn finish(&mut self, error: Option<VotingError>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let coordinator = self.coordinator;
        let mut slot = coordinator.lock_slot();
        if error.is_some() {
            coordinator.transition(&mut slot, TxState::Failed);
        }
        let operation = slot.pending.take();
        coordinator.transition(&mut slot, TxState::Idle);
        drop(slot);

        let Some(operation) = operation else {
            return;
        };
        let operation = match error {
            Some(error) => {
                warn!(
                    operation_id = %operation.operation_id,
                    kind = ?error.kind(),
                    "coordinator: operation failed: {}",
                    error.message()
                );
                operation.failed(error)
            }
            None => {
                info!(operation_id = %operation.operation_id, "coordinator: operation confirmed");
                operation.confirmed()
            }
        };
        let _ = coordinator
            .events
            .send(ClientEvent::OperationFinished(operation));
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.confirmed {
            warn!("coordinator: abandoned while applying a confirmed operation, cache reconciles on next refresh");
            self.finish(None);
        } else {
            self.finish(Some(VotingError::new(
                ErrorKind::Transport,
                "confirmation wait abandoned; the outcome will show after the next refresh",
            )));
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
