use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No wallet capability is reachable.
    NoSigningAgent,
    /// The human declined authorization.
    UserRejected,
    /// Node unreachable, malformed response, or confirmation wait timed out.
    Transport,
    /// Contract-level rule violation, or a request rejected locally for the
    /// same reason (already voted, empty name).
    RemoteRejected,
    /// Candidate id outside the ledger's current range.
    NotFound,
    /// Another transaction from this identity is still in flight.
    Busy,
}

impl ErrorKind {
    /// One human-readable message per kind for the presentation layer.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::NoSigningAgent => {
                "No wallet available; install or enable a signing agent and retry."
            }
            Self::UserRejected => "Authorization was declined in the wallet; retry to connect.",
            Self::Transport => {
                "Ledger node unreachable or slow to respond; the result will show after the next refresh."
            }
            Self::RemoteRejected => "The contract rejected this request; change it and try again.",
            Self::NotFound => "That candidate no longer matches the ledger; the list was refreshed.",
            Self::Busy => "A transaction is already in progress; wait for it to finish.",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NoSigningAgent | Self::UserRejected | Self::Transport | Self::Busy
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct VotingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VotingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn already_voted(candidate_id: u64) -> Self {
        Self::new(
            ErrorKind::RemoteRejected,
            format!("already voted for candidate {candidate_id}"),
        )
    }

    pub fn busy() -> Self {
        Self::new(ErrorKind::Busy, "a transaction is already in flight")
    }
}
