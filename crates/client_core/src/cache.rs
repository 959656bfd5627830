//! Local mirror of the contract's candidate list and this identity's vote.

use std::{collections::BTreeMap, sync::Arc};

use shared::domain::{Candidate, CandidateId, Identity};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{error::LedgerError, ledger::RemoteLedgerClient};

/// Upper bound on the candidate count a hydrate will walk.
pub const MAX_CANDIDATES: u64 = 10_000;

#[derive(Debug, Clone, Default)]
struct CacheState {
    candidates: BTreeMap<CandidateId, Candidate>,
    voted_for: Option<CandidateId>,
    hydrated: bool,
    /// Bumped by every write; a hydrate whose reads straddle a write is
    /// discarded.
    generation: u64,
}

/// Written only by [`ContractStateCache::hydrate`] and the `apply_confirmed_*`
/// steps. Every write replaces or patches the state under a single lock
/// acquisition, so readers never see a half-applied update.
pub struct ContractStateCache {
    ledger: Arc<dyn RemoteLedgerClient>,
    identity: Identity,
    state: RwLock<CacheState>,
}

impl ContractStateCache {
    pub fn new(ledger: Arc<dyn RemoteLedgerClient>, identity: Identity) -> Self {
        Self {
            ledger,
            identity,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Full read of `1..=count` and the identity's vote record. On any error
    /// the previous state is kept as is. If a confirmed operation was applied
    /// while the reads were in flight, the newer state is kept and this read
    /// is dropped.
    pub async fn hydrate(&self) -> Result<(), LedgerError> {
        let started_at = self.state.read().await.generation;
        let count = self.ledger.read_candidate_count().await?;
        if count > MAX_CANDIDATES {
            return Err(LedgerError::Decode(format!(
                "candidate count {count} exceeds the supported maximum of {MAX_CANDIDATES}"
            )));
        }
        let mut candidates = BTreeMap::new();
        for raw_id in 1..=count {
            let id = CandidateId(raw_id);
            let candidate = self.ledger.read_candidate(id).await?;
            if candidate.id != id {
                return Err(LedgerError::Decode(format!(
                    "requested candidate {id}, ledger returned {}",
                    candidate.id
                )));
            }
            candidates.insert(id, candidate);
        }

        let voted_for = self.ledger.read_vote_record(&self.identity).await?;
        if let Some(candidate_id) = voted_for {
            if !candidates.contains_key(&candidate_id) {
                warn!(
                    candidate_id = candidate_id.0,
                    count, "cache: vote record points outside the candidate range"
                );
            }
        }

        let mut state = self.state.write().await;
        if state.generation != started_at {
            debug!(
                identity = %self.identity,
                "cache: state changed during hydrate, discarding stale read"
            );
            return Ok(());
        }
        *state = CacheState {
            candidates,
            voted_for,
            hydrated: true,
            generation: started_at + 1,
        };
        drop(state);
        info!(
            identity = %self.identity,
            count,
            voted_for = voted_for.map(|id| id.0),
            "cache: hydrated"
        );
        Ok(())
    }

    pub async fn apply_confirmed_vote(&self, candidate_id: CandidateId) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let Some(candidate) = state.candidates.get_mut(&candidate_id) else {
            return Err(LedgerError::NotFound(candidate_id));
        };
        candidate.vote_count = candidate.vote_count.saturating_add(1);
        state.voted_for = Some(candidate_id);
        state.generation += 1;
        Ok(())
    }

    /// Appends the candidate the ledger assigned to `name`. The id comes from
    /// a fresh count read; when the count or the name does not line up with
    /// a single append the cache is re-hydrated instead of patched.
    pub async fn apply_confirmed_add_candidate(
        &self,
        name: &str,
    ) -> Result<Option<Candidate>, LedgerError> {
        let count = self.ledger.read_candidate_count().await?;
        let local_len = self.len().await as u64;

        if count != local_len + 1 {
            warn!(
                count,
                local_len, "cache: candidate count moved by more than one, re-hydrating"
            );
            return self.rehydrate_and_find(name).await;
        }

        let candidate = self.ledger.read_candidate(CandidateId(count)).await?;
        if candidate.name != name {
            warn!(
                candidate_id = count,
                expected = name,
                found = %candidate.name,
                "cache: newest candidate is not ours, re-hydrating"
            );
            return self.rehydrate_and_find(name).await;
        }

        {
            let mut state = self.state.write().await;
            if state.candidates.len() as u64 + 1 == count {
                state.candidates.insert(candidate.id, candidate.clone());
                state.generation += 1;
            } else if !state.candidates.contains_key(&candidate.id) {
                drop(state);
                return self.rehydrate_and_find(name).await;
            }
        }
        info!(candidate_id = count, candidate = name, "cache: appended candidate");
        Ok(Some(candidate))
    }

    async fn rehydrate_and_find(&self, name: &str) -> Result<Option<Candidate>, LedgerError> {
        self.hydrate().await?;
        let state = self.state.read().await;
        Ok(state
            .candidates
            .values()
            .rev()
            .find(|candidate| candidate.name == name)
            .cloned())
    }

    /// Candidates in ascending id order.
    pub async fn snapshot(&self) -> Vec<Candidate> {
        self.state.read().await.candidates.values().cloned().collect()
    }

    pub async fn voted_for(&self) -> Option<CandidateId> {
        self.state.read().await.voted_for
    }

    pub async fn has_voted(&self) -> bool {
        self.voted_for().await.is_some()
    }

    pub async fn is_hydrated(&self) -> bool {
        self.state.read().await.hydrated
    }

    pub async fn contains(&self, candidate_id: CandidateId) -> bool {
        self.state.read().await.candidates.contains_key(&candidate_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.candidates.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
