use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::VotingError, protocol::TxHash};

/// Externally issued account address. Opaque, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based candidate id assigned by the contract. Zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub vote_count: u64,
}

impl Candidate {
    pub fn new(id: u64, name: impl Into<String>, vote_count: u64) -> Self {
        Self {
            id: CandidateId(id),
            name: name.into(),
            vote_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Vote,
    AddCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OperationPayload {
    Vote { candidate_id: CandidateId },
    AddCandidate { name: String },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Vote { .. } => OperationKind::Vote,
            Self::AddCandidate { .. } => OperationKind::AddCandidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Submitted,
    Confirmed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// A state-changing request from the moment it is accepted locally until the
/// UI has been told its terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub operation_id: Uuid,
    pub payload: OperationPayload,
    pub status: OperationStatus,
    pub receipt: Option<TxHash>,
    pub error: Option<VotingError>,
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn new(payload: OperationPayload) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            payload,
            status: OperationStatus::Submitted,
            receipt: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn confirmed(mut self) -> Self {
        self.status = OperationStatus::Confirmed;
        self
    }

    pub fn failed(mut self, error: VotingError) -> Self {
        self.status = OperationStatus::Failed;
        self.error = Some(error);
        self
    }
}

/// Transaction pipeline state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    #[default]
    Idle,
    Submitting,
    AwaitingConfirmation,
    Applying,
    Failed,
}

impl TxState {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Applying => "applying",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
