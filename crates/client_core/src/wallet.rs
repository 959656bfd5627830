//! Acquisition of an authorized signing identity from a wallet-like agent.

use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::Identity,
    protocol::{UNAUTHORIZED, USER_REJECTED_REQUEST},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::IdentityError,
    transport::{RpcCallError, RpcClient},
};

const METHOD_NOT_FOUND: i64 = -32601;

#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Returns the same identity without re-prompting once authorized.
    async fn connect(&self) -> Result<Identity, IdentityError>;
}

pub struct MissingWalletConnector;

#[async_trait]
impl WalletConnector for MissingWalletConnector {
    async fn connect(&self) -> Result<Identity, IdentityError> {
        Err(IdentityError::NoSigningAgent(
            "no signing agent is configured".to_string(),
        ))
    }
}

/// EIP-1193 style agent reached over JSON-RPC (browser bridge, dev node
/// with unlocked accounts, remote signer).
pub struct JsonRpcWalletConnector {
    rpc: RpcClient,
    authorized: Mutex<Option<Identity>>,
}

impl JsonRpcWalletConnector {
    pub fn new(signer_url: Url) -> Result<Self, IdentityError> {
        let rpc = RpcClient::new(signer_url)
            .map_err(|e| IdentityError::NoSigningAgent(e.to_string()))?;
        Ok(Self {
            rpc,
            authorized: Mutex::new(None),
        })
    }

    async fn accounts(&self, method: &str) -> Result<Vec<String>, IdentityError> {
        self.rpc
            .call::<Vec<String>>(method, json!([]))
            .await
            .map_err(|err| match err {
                RpcCallError::Transport { endpoint, reason } => IdentityError::NoSigningAgent(
                    format!("signing agent unreachable at {endpoint}: {reason}"),
                ),
                RpcCallError::Rpc(error) if error.code == USER_REJECTED_REQUEST => {
                    IdentityError::UserRejected(error.message)
                }
                RpcCallError::Rpc(error)
                    if error.code == METHOD_NOT_FOUND || error.code == UNAUTHORIZED =>
                {
                    IdentityError::NoSigningAgent(format!("{method}: {}", error.message))
                }
                other => IdentityError::Transport(other.to_string()),
            })
    }
}

#[async_trait]
impl WalletConnector for JsonRpcWalletConnector {
    async fn connect(&self) -> Result<Identity, IdentityError> {
        // Held across the prompt so concurrent callers share one authorization.
        let mut authorized = self.authorized.lock().await;
        if let Some(identity) = authorized.as_ref() {
            debug!(identity = %identity, "wallet: reusing authorized identity");
            return Ok(identity.clone());
        }

        let mut accounts = self.accounts("eth_accounts").await?;
        if accounts.is_empty() {
            info!(endpoint = %self.rpc.endpoint(), "wallet: requesting account authorization");
            accounts = self.accounts("eth_requestAccounts").await?;
        }

        let Some(account) = accounts.into_iter().next() else {
            warn!(endpoint = %self.rpc.endpoint(), "wallet: agent returned no accounts");
            return Err(IdentityError::UserRejected(
                "no account was authorized".to_string(),
            ));
        };

        let identity = Identity::new(account);
        info!(identity = %identity, "wallet: connected");
        *authorized = Some(identity.clone());
        Ok(identity)
    }
}
