use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use shared::{
    domain::{Candidate, CandidateId, Identity, PendingOperation, TxState},
    error::{ErrorKind, VotingError},
};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

pub mod abi;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod transport;
pub mod wallet;

pub use cache::ContractStateCache;
pub use config::{load_settings, ClientConfig, Settings};
pub use coordinator::TransactionCoordinator;
pub use ledger::{JsonRpcLedgerConnector, LedgerConnector, RemoteLedgerClient};
pub use wallet::{JsonRpcWalletConnector, MissingWalletConnector, WalletConnector};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected(Identity),
    Disconnected,
    CandidatesUpdated(Vec<Candidate>),
    VoteRecordUpdated(Option<CandidateId>),
    TransactionStateChanged(TxState),
    OperationSubmitted(PendingOperation),
    /// Terminal status, sent exactly once for every accepted operation.
    OperationFinished(PendingOperation),
    Error(VotingError),
}

struct Session {
    identity: Identity,
    cache: Arc<ContractStateCache>,
    coordinator: TransactionCoordinator,
}

/// Entry point for a presentation layer. One instance per client; the
/// session it holds lives from `initialize` until `disconnect`.
pub struct VotingController {
    wallet: Arc<dyn WalletConnector>,
    ledger_connector: Arc<dyn LedgerConnector>,
    confirmation_timeout: Duration,
    session: RwLock<Option<Arc<Session>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl VotingController {
    pub fn new(
        wallet: Arc<dyn WalletConnector>,
        ledger_connector: Arc<dyn LedgerConnector>,
        confirmation_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            wallet,
            ledger_connector,
            confirmation_timeout,
            session: RwLock::new(None),
            events,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Arc<Self>> {
        let wallet = JsonRpcWalletConnector::new(config.signer_url.clone())
            .map_err(|e| anyhow!("failed to create wallet connector: {e}"))?;
        let ledger = JsonRpcLedgerConnector::new(
            config.rpc_url.clone(),
            config.signer_url.clone(),
            &config.contract_address,
            config.receipt_poll_interval,
        )
        .map_err(|e| anyhow!("failed to create ledger connector: {e}"))?;
        Ok(Self::new(
            Arc::new(wallet),
            Arc::new(ledger),
            config.confirmation_timeout,
        ))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connects the identity and performs the initial full read. Calling it
    /// again on a live session returns the same identity. The session lock
    /// is only taken to install the result, so queries keep answering "not
    /// connected" while authorization is pending.
    pub async fn initialize(&self) -> Result<Identity, VotingError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.identity.clone());
        }

        let session = match self.open_session().await {
            Ok(session) => session,
            Err(err) => return Err(self.report(err)),
        };

        let mut guard = self.session.write().await;
        if let Some(existing) = guard.as_ref() {
            // A concurrent initialize won the race; keep its session.
            return Ok(existing.identity.clone());
        }
        let identity = session.identity.clone();
        *guard = Some(Arc::clone(&session));
        drop(guard);

        info!(identity = %identity, "controller: session initialized");
        let _ = self.events.send(ClientEvent::Connected(identity.clone()));
        self.publish_cache(&session).await;
        Ok(identity)
    }

    async fn open_session(&self) -> Result<Arc<Session>, VotingError> {
        let identity = self.wallet.connect().await?;
        let ledger = self.ledger_connector.bind(&identity).await?;
        let cache = Arc::new(ContractStateCache::new(
            Arc::clone(&ledger),
            identity.clone(),
        ));
        cache.hydrate().await?;
        let coordinator = TransactionCoordinator::new(
            ledger,
            Arc::clone(&cache),
            self.confirmation_timeout,
            self.events.clone(),
        );
        Ok(Arc::new(Session {
            identity,
            cache,
            coordinator,
        }))
    }

    pub async fn disconnect(&self) {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            info!(identity = %session.identity, "controller: session closed");
            let _ = self.events.send(ClientEvent::Disconnected);
        }
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.identity.clone())
    }

    pub async fn list_candidates(&self) -> Result<Vec<Candidate>, VotingError> {
        let session = self.session().await?;
        Ok(session.cache.snapshot().await)
    }

    /// Forced full re-read; resolves any ambiguity left by a timed-out
    /// confirmation.
    pub async fn refresh(&self) -> Result<Vec<Candidate>, VotingError> {
        let session = self.session().await?;
        if let Err(err) = session.cache.hydrate().await {
            return Err(self.report(err.into()));
        }
        self.publish_cache(&session).await;
        Ok(session.cache.snapshot().await)
    }

    pub async fn vote(&self, candidate_id: CandidateId) -> Result<(), VotingError> {
        let session = self.session().await?;
        let result = session.coordinator.vote(candidate_id).await;
        self.after_operation(&session, result).await
    }

    pub async fn add_candidate(&self, name: &str) -> Result<Option<Candidate>, VotingError> {
        let session = self.session().await?;
        let result = session.coordinator.add_candidate(name).await;
        self.after_operation(&session, result).await
    }

    pub async fn has_voted(&self) -> bool {
        self.voted_for().await.is_some()
    }

    pub async fn voted_for(&self) -> Option<CandidateId> {
        match self.session().await {
            Ok(session) => session.cache.voted_for().await,
            Err(_) => None,
        }
    }

    pub async fn transaction_state(&self) -> TxState {
        match self.session().await {
            Ok(session) => session.coordinator.state(),
            Err(_) => TxState::Idle,
        }
    }

    pub async fn pending_operation(&self) -> Option<PendingOperation> {
        self.session()
            .await
            .ok()
            .and_then(|session| session.coordinator.pending_operation())
    }

    /// False while any transaction is in flight, before hydration, and once
    /// the cached record shows a vote.
    pub async fn can_vote(&self) -> bool {
        let Ok(session) = self.session().await else {
            return false;
        };
        session.coordinator.is_idle()
            && session.cache.is_hydrated().await
            && !session.cache.has_voted().await
    }

    pub async fn can_add_candidate(&self) -> bool {
        let Ok(session) = self.session().await else {
            return false;
        };
        session.coordinator.is_idle() && session.cache.is_hydrated().await
    }

    async fn session(&self) -> Result<Arc<Session>, VotingError> {
        self.session.read().await.clone().ok_or_else(|| {
            VotingError::new(
                ErrorKind::NoSigningAgent,
                "not connected: initialize the session first",
            )
        })
    }

    async fn after_operation<T>(
        &self,
        session: &Session,
        result: Result<T, VotingError>,
    ) -> Result<T, VotingError> {
        match result {
            Ok(value) => {
                self.publish_cache(session).await;
                Ok(value)
            }
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    warn!("controller: candidate not found, forcing re-hydrate");
                    match session.cache.hydrate().await {
                        Ok(()) => self.publish_cache(session).await,
                        Err(hydrate_err) => {
                            warn!("controller: forced re-hydrate failed: {hydrate_err}")
                        }
                    }
                }
                Err(self.report(err))
            }
        }
    }

    async fn publish_cache(&self, session: &Session) {
        let _ = self
            .events
            .send(ClientEvent::CandidatesUpdated(session.cache.snapshot().await));
        let _ = self
            .events
            .send(ClientEvent::VoteRecordUpdated(session.cache.voted_for().await));
    }

    fn report(&self, err: VotingError) -> VotingError {
        let _ = self.events.send(ClientEvent::Error(err.clone()));
        err
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
