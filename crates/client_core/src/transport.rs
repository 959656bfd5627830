//! Minimal JSON-RPC 2.0 client shared by the wallet and ledger boundaries.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::protocol::{RpcErrorObject, RpcRequest, RpcResponse};
use thiserror::Error;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcErrorObject),
    #[error("malformed rpc response: {0}")]
    Decode(String),
}

pub struct RpcClient {
    http: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: Url) -> Result<Self, RpcCallError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RpcCallError::Transport {
                endpoint: endpoint.to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one request and decode its `result` field into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, endpoint = %self.endpoint, "rpc: sending request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RpcRequest::new(id, method, params))
            .send()
            .await
            .map_err(|e| self.transport_error(format!("{e}")))?;

        if !response.status().is_success() {
            return Err(self.transport_error(format!("HTTP {}", response.status())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcCallError::Decode(format!("{method}: {e}")))?;

        if let Some(error) = body.error {
            return Err(RpcCallError::Rpc(error));
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| RpcCallError::Decode(format!("{method}: {e}")))
    }

    fn transport_error(&self, reason: String) -> RpcCallError {
        RpcCallError::Transport {
            endpoint: self.endpoint.to_string(),
            reason,
        }
    }
}
