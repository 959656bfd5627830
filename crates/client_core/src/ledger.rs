//! Typed boundary to the voting contract deployed on a JSON-RPC ledger node.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{Candidate, CandidateId, Identity},
    protocol::{CallParams, ConfirmationOutcome, TransactionReceipt, TxHash},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    abi::{self, addCandidateCall, candidatesCountCall, getCandidateCall, voteCall, votersCall},
    error::LedgerError,
    transport::RpcClient,
};

/// Consecutive receipt polls that may fail before the wait gives up.
const MAX_RECEIPT_POLL_FAILURES: usize = 3;
const TX_HASH_LEN: usize = 32;

/// Reads and writes against the contract. Every call may suspend for an
/// unbounded amount of time; callers bound the waits they care about.
#[async_trait]
pub trait RemoteLedgerClient: Send + Sync {
    async fn read_candidate_count(&self) -> Result<u64, LedgerError>;
    /// Fails with [`LedgerError::NotFound`] outside `1..=count`.
    async fn read_candidate(&self, id: CandidateId) -> Result<Candidate, LedgerError>;
    async fn read_vote_record(&self, identity: &Identity)
        -> Result<Option<CandidateId>, LedgerError>;
    async fn submit_vote(&self, candidate_id: CandidateId) -> Result<TxHash, LedgerError>;
    async fn submit_add_candidate(&self, name: &str) -> Result<TxHash, LedgerError>;
    /// Suspends until the ledger finalizes the transaction.
    async fn await_confirmation(&self, receipt: &TxHash)
        -> Result<ConfirmationOutcome, LedgerError>;
}

/// Binds a ledger client to an authorized identity so that writes are
/// signed and sent on its behalf.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn bind(&self, identity: &Identity) -> Result<Arc<dyn RemoteLedgerClient>, LedgerError>;
}

/// Reads and receipt polls go to the node endpoint; `eth_sendTransaction`
/// goes to the signer endpoint, which holds the identity's keys.
pub struct JsonRpcLedgerConnector {
    rpc: Arc<RpcClient>,
    signer: Arc<RpcClient>,
    contract: Address,
    receipt_poll_interval: Duration,
}

impl JsonRpcLedgerConnector {
    pub fn new(
        rpc_url: Url,
        signer_url: Url,
        contract_address: &str,
        receipt_poll_interval: Duration,
    ) -> Result<Self, LedgerError> {
        let contract = abi::parse_address(contract_address)?;
        Ok(Self {
            rpc: Arc::new(RpcClient::new(rpc_url)?),
            signer: Arc::new(RpcClient::new(signer_url)?),
            contract,
            receipt_poll_interval,
        })
    }
}

#[async_trait]
impl LedgerConnector for JsonRpcLedgerConnector {
    async fn bind(&self, identity: &Identity) -> Result<Arc<dyn RemoteLedgerClient>, LedgerError> {
        let from = abi::parse_address(identity.as_str())?;
        info!(
            identity = %identity,
            contract = %self.contract,
            endpoint = %self.rpc.endpoint(),
            "ledger: bound session"
        );
        Ok(Arc::new(JsonRpcLedgerClient {
            rpc: Arc::clone(&self.rpc),
            signer: Arc::clone(&self.signer),
            contract: abi::encode_hex(self.contract.as_slice()),
            from: abi::encode_hex(from.as_slice()),
            receipt_poll_interval: self.receipt_poll_interval,
        }))
    }
}

pub struct JsonRpcLedgerClient {
    rpc: Arc<RpcClient>,
    signer: Arc<RpcClient>,
    contract: String,
    from: String,
    receipt_poll_interval: Duration,
}

impl JsonRpcLedgerClient {
    fn call_params(&self, data: Vec<u8>) -> CallParams {
        CallParams {
            from: Some(self.from.clone()),
            to: self.contract.clone(),
            data: abi::encode_hex(&data),
        }
    }

    async fn eth_call<C: SolCall>(&self, call: C) -> Result<C::Return, LedgerError> {
        let raw: String = self
            .rpc
            .call("eth_call", json!([self.call_params(call.abi_encode()), "latest"]))
            .await?;
        C::abi_decode_returns(&abi::decode_hex(&raw)?, true).map_err(abi::decode_error)
    }

    async fn send_transaction(&self, data: Vec<u8>) -> Result<TxHash, LedgerError> {
        let raw: String = self
            .signer
            .call("eth_sendTransaction", json!([self.call_params(data)]))
            .await?;
        let bytes = abi::decode_hex(&raw)?;
        if bytes.len() != TX_HASH_LEN {
            return Err(LedgerError::Decode(format!(
                "transaction hash must be {TX_HASH_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(TxHash(raw))
    }

    async fn fetch_receipt(&self, receipt: &TxHash) -> Result<Option<TransactionReceipt>, LedgerError> {
        Ok(self
            .rpc
            .call("eth_getTransactionReceipt", json!([receipt.0]))
            .await?)
    }
}

#[async_trait]
impl RemoteLedgerClient for JsonRpcLedgerClient {
    async fn read_candidate_count(&self) -> Result<u64, LedgerError> {
        let count = self.eth_call(candidatesCountCall {}).await?._0;
        abi::to_u64(count, "candidate count")
    }

    async fn read_candidate(&self, id: CandidateId) -> Result<Candidate, LedgerError> {
        if id.0 == 0 {
            return Err(LedgerError::NotFound(id));
        }
        let returned = match self
            .eth_call(getCandidateCall {
                id: U256::from(id.0),
            })
            .await
        {
            Ok(returned) => returned,
            Err(LedgerError::Reverted(reason)) => {
                debug!(candidate_id = id.0, %reason, "ledger: getCandidate reverted");
                return Err(LedgerError::NotFound(id));
            }
            Err(err) => return Err(err),
        };
        Ok(Candidate {
            id,
            name: returned.name,
            vote_count: abi::to_u64(returned.voteCount, "vote count")?,
        })
    }

    async fn read_vote_record(
        &self,
        identity: &Identity,
    ) -> Result<Option<CandidateId>, LedgerError> {
        let voter = abi::parse_address(identity.as_str())?;
        let recorded = self.eth_call(votersCall { voter }).await?._0;
        let candidate_id = abi::to_u64(recorded, "vote record")?;
        Ok((candidate_id != 0).then_some(CandidateId(candidate_id)))
    }

    async fn submit_vote(&self, candidate_id: CandidateId) -> Result<TxHash, LedgerError> {
        let tx = self
            .send_transaction(
                voteCall {
                    candidateId: U256::from(candidate_id.0),
                }
                .abi_encode(),
            )
            .await?;
        info!(candidate_id = candidate_id.0, tx_hash = %tx, "ledger: vote submitted");
        Ok(tx)
    }

    async fn submit_add_candidate(&self, name: &str) -> Result<TxHash, LedgerError> {
        let tx = self
            .send_transaction(
                addCandidateCall {
                    name: name.to_string(),
                }
                .abi_encode(),
            )
            .await?;
        info!(candidate = name, tx_hash = %tx, "ledger: addCandidate submitted");
        Ok(tx)
    }

    async fn await_confirmation(
        &self,
        receipt: &TxHash,
    ) -> Result<ConfirmationOutcome, LedgerError> {
        let mut consecutive_failures = 0;
        loop {
            match self.fetch_receipt(receipt).await {
                Ok(Some(tx_receipt)) => {
                    let status = tx_receipt.status.as_deref().ok_or_else(|| {
                        LedgerError::Decode(format!("receipt for {receipt} has no status"))
                    })?;
                    let outcome = if abi::parse_quantity(status)? == 1 {
                        ConfirmationOutcome::Confirmed
                    } else {
                        ConfirmationOutcome::Reverted
                    };
                    info!(
                        tx_hash = %receipt,
                        block = tx_receipt.block_number.as_deref().unwrap_or("pending"),
                        ?outcome,
                        "ledger: transaction finalized"
                    );
                    return Ok(outcome);
                }
                Ok(None) => consecutive_failures = 0,
                Err(err @ LedgerError::Transport(_)) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_RECEIPT_POLL_FAILURES {
                        return Err(err);
                    }
                    warn!(
                        tx_hash = %receipt,
                        attempt = consecutive_failures,
                        "ledger: receipt poll failed: {err}"
                    );
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
