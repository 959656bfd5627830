use shared::{
    domain::CandidateId,
    error::{ErrorKind, VotingError},
    protocol::{RpcErrorObject, UNAUTHORIZED, USER_REJECTED_REQUEST},
};
use thiserror::Error;

use crate::transport::RpcCallError;

/// JSON-RPC codes for malformed or unsupported requests and node-internal failures.
const PROTOCOL_ERROR_CODES: [i64; 5] = [-32700, -32600, -32601, -32602, -32603];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport failure: {0}")]
    Transport(String),
    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("candidate {0} not found")]
    NotFound(CandidateId),
    #[error("malformed ledger response: {0}")]
    Decode(String),
}

impl From<RpcCallError> for LedgerError {
    fn from(value: RpcCallError) -> Self {
        match value {
            RpcCallError::Transport { endpoint, reason } => {
                Self::Transport(format!("{endpoint}: {reason}"))
            }
            RpcCallError::Rpc(error) if error.is_revert() => Self::Reverted(error.message),
            RpcCallError::Rpc(RpcErrorObject { code, message, .. }) => Self::Rpc { code, message },
            RpcCallError::Decode(reason) => Self::Decode(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no signing agent available: {0}")]
    NoSigningAgent(String),
    #[error("authorization rejected: {0}")]
    UserRejected(String),
    #[error("signing agent transport failure: {0}")]
    Transport(String),
}

impl From<LedgerError> for VotingError {
    fn from(value: LedgerError) -> Self {
        let kind = match &value {
            LedgerError::Transport(_) | LedgerError::Decode(_) => ErrorKind::Transport,
            LedgerError::Reverted(_) => ErrorKind::RemoteRejected,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Rpc { code, .. } if *code == USER_REJECTED_REQUEST => {
                ErrorKind::UserRejected
            }
            LedgerError::Rpc { code, .. } if *code == UNAUTHORIZED => ErrorKind::NoSigningAgent,
            LedgerError::Rpc { code, .. } if PROTOCOL_ERROR_CODES.contains(code) => {
                ErrorKind::Transport
            }
            LedgerError::Rpc { .. } => ErrorKind::RemoteRejected,
        };
        VotingError::new(kind, value.to_string())
    }
}

impl From<IdentityError> for VotingError {
    fn from(value: IdentityError) -> Self {
        let kind = match &value {
            IdentityError::NoSigningAgent(_) => ErrorKind::NoSigningAgent,
            IdentityError::UserRejected(_) => ErrorKind::UserRejected,
            IdentityError::Transport(_) => ErrorKind::Transport,
        };
        VotingError::new(kind, value.to_string())
    }
}
