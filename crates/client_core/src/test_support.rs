//! In-memory ledger and wallet fakes plus a scripted JSON-RPC node for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::{
    domain::{Candidate, CandidateId, Identity},
    protocol::{
        CallParams, ConfirmationOutcome, RpcErrorObject, RpcRequest, RpcResponse, TxHash,
        USER_REJECTED_REQUEST,
    },
};
use tokio::{
    net::TcpListener,
    sync::{Notify, Semaphore},
};
use url::Url;

use crate::{
    abi::{self, candidatesCountCall, getCandidateCall, voteCall, votersCall},
    error::{IdentityError, LedgerError},
    ledger::{LedgerConnector, RemoteLedgerClient},
    wallet::WalletConnector,
};

pub const VOTER: &str = "0x00000000000000000000000000000000000000aa";

pub fn voter() -> Identity {
    Identity::new(VOTER)
}

#[derive(Debug, Clone)]
enum Action {
    Vote(CandidateId),
    AddCandidate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Apply,
    Revert,
    /// Never resolves; exercises the confirmation timeout.
    Hang,
}

#[derive(Default)]
struct LedgerState {
    candidates: Vec<(String, u64)>,
    voters: HashMap<Identity, CandidateId>,
    pending: HashMap<TxHash, Action>,
    next_tx: u64,
    submit_error: Option<String>,
    read_error: Option<String>,
    confirmation: Option<Confirmation>,
    read_hold: Option<(CandidateId, Arc<Notify>, Arc<Semaphore>)>,
}

pub struct FakeLedger {
    identity: Identity,
    state: Mutex<LedgerState>,
    gate: Option<Arc<Semaphore>>,
    pub submit_calls: AtomicUsize,
    pub count_reads: AtomicUsize,
    pub candidate_reads: AtomicUsize,
}

impl FakeLedger {
    pub fn with_candidates(names: &[&str]) -> Arc<Self> {
        Arc::new(Self::build(names, None))
    }

    /// Confirmations wait for a permit from the returned semaphore.
    pub fn gated(names: &[&str]) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self::build(names, Some(Arc::clone(&gate)))), gate)
    }

    fn build(names: &[&str], gate: Option<Arc<Semaphore>>) -> Self {
        let state = LedgerState {
            candidates: names.iter().map(|name| (name.to_string(), 0)).collect(),
            ..LedgerState::default()
        };
        Self {
            identity: voter(),
            state: Mutex::new(state),
            gate,
            submit_calls: AtomicUsize::new(0),
            count_reads: AtomicUsize::new(0),
            candidate_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_confirmation(&self, confirmation: Confirmation) {
        self.state.lock().expect("ledger state").confirmation = Some(confirmation);
    }

    pub fn reject_submissions(&self, reason: &str) {
        self.state.lock().expect("ledger state").submit_error = Some(reason.to_string());
    }

    pub fn fail_reads(&self, reason: Option<&str>) {
        self.state.lock().expect("ledger state").read_error = reason.map(str::to_string);
    }

    /// The next read of `candidate_id` completes against the current ledger
    /// state, signals the returned `Notify`, then waits for a permit before
    /// returning.
    pub fn hold_candidate_read(&self, candidate_id: u64) -> (Arc<Notify>, Arc<Semaphore>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Semaphore::new(0));
        self.state.lock().expect("ledger state").read_hold = Some((
            CandidateId(candidate_id),
            Arc::clone(&reached),
            Arc::clone(&release),
        ));
        (reached, release)
    }

    /// Another client adds a candidate directly on the ledger.
    pub fn external_add(&self, name: &str) {
        self.state
            .lock()
            .expect("ledger state")
            .candidates
            .push((name.to_string(), 0));
    }

    /// Another client's vote for `candidate_id` lands on the ledger.
    pub fn external_vote(&self, candidate_id: u64) {
        let mut state = self.state.lock().expect("ledger state");
        if let Some(entry) = state.candidates.get_mut(candidate_id as usize - 1) {
            entry.1 += 1;
        }
    }

    pub fn record_vote(&self, identity: Identity, candidate_id: u64) {
        self.state
            .lock()
            .expect("ledger state")
            .voters
            .insert(identity, CandidateId(candidate_id));
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<(), LedgerError> {
        match &self.state.lock().expect("ledger state").read_error {
            Some(reason) => Err(LedgerError::Transport(reason.clone())),
            None => Ok(()),
        }
    }

    fn submit(&self, action: Action) -> Result<TxHash, LedgerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().expect("ledger state");
        if let Some(reason) = &state.submit_error {
            return Err(LedgerError::Reverted(reason.clone()));
        }
        state.next_tx += 1;
        let tx = TxHash(format!("0x{:064x}", state.next_tx));
        state.pending.insert(tx.clone(), action);
        Ok(tx)
    }
}

#[async_trait]
impl RemoteLedgerClient for FakeLedger {
    async fn read_candidate_count(&self) -> Result<u64, LedgerError> {
        self.check_reads()?;
        self.count_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().expect("ledger state").candidates.len() as u64)
    }

    async fn read_candidate(&self, id: CandidateId) -> Result<Candidate, LedgerError> {
        self.check_reads()?;
        self.candidate_reads.fetch_add(1, Ordering::SeqCst);
        let (result, hold) = {
            let mut state = self.state.lock().expect("ledger state");
            let result = usize::try_from(id.0)
                .ok()
                .and_then(|raw| raw.checked_sub(1))
                .and_then(|index| state.candidates.get(index))
                .map(|(name, votes)| Candidate::new(id.0, name.clone(), *votes))
                .ok_or(LedgerError::NotFound(id));
            let hold = match &state.read_hold {
                Some((held, _, _)) if *held == id => state.read_hold.take(),
                _ => None,
            };
            (result, hold)
        };
        if let Some((_, reached, release)) = hold {
            reached.notify_one();
            release
                .acquire()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?
                .forget();
        }
        result
    }

    async fn read_vote_record(
        &self,
        identity: &Identity,
    ) -> Result<Option<CandidateId>, LedgerError> {
        self.check_reads()?;
        Ok(self
            .state
            .lock()
            .expect("ledger state")
            .voters
            .get(identity)
            .copied())
    }

    async fn submit_vote(&self, candidate_id: CandidateId) -> Result<TxHash, LedgerError> {
        self.submit(Action::Vote(candidate_id))
    }

    async fn submit_add_candidate(&self, name: &str) -> Result<TxHash, LedgerError> {
        self.submit(Action::AddCandidate(name.to_string()))
    }

    async fn await_confirmation(
        &self,
        receipt: &TxHash,
    ) -> Result<ConfirmationOutcome, LedgerError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?
                .forget();
        }

        let confirmation = self
            .state
            .lock()
            .expect("ledger state")
            .confirmation
            .unwrap_or(Confirmation::Apply);
        match confirmation {
            Confirmation::Hang => std::future::pending().await,
            Confirmation::Revert => {
                self.state.lock().expect("ledger state").pending.remove(receipt);
                Ok(ConfirmationOutcome::Reverted)
            }
            Confirmation::Apply => {
                let mut state = self.state.lock().expect("ledger state");
                let action = state
                    .pending
                    .remove(receipt)
                    .ok_or_else(|| LedgerError::Transport(format!("unknown receipt {receipt}")))?;
                match action {
                    Action::Vote(candidate_id) => {
                        if let Some(entry) = state.candidates.get_mut(candidate_id.0 as usize - 1) {
                            entry.1 += 1;
                        }
                        state.voters.insert(self.identity.clone(), candidate_id);
                    }
                    Action::AddCandidate(name) => state.candidates.push((name, 0)),
                }
                Ok(ConfirmationOutcome::Confirmed)
            }
        }
    }
}

pub struct FakeLedgerConnector {
    pub ledger: Arc<FakeLedger>,
}

#[async_trait]
impl LedgerConnector for FakeLedgerConnector {
    async fn bind(&self, _identity: &Identity) -> Result<Arc<dyn RemoteLedgerClient>, LedgerError> {
        let ledger: Arc<dyn RemoteLedgerClient> = self.ledger.clone();
        Ok(ledger)
    }
}

pub enum WalletBehavior {
    Authorize,
    /// Counts the prompt, then waits for a permit before authorizing.
    AuthorizeAfter(Arc<Semaphore>),
    Reject,
    Absent,
}

pub struct FakeWallet {
    behavior: WalletBehavior,
    pub prompts: AtomicUsize,
}

impl FakeWallet {
    pub fn new(behavior: WalletBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            prompts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WalletConnector for FakeWallet {
    async fn connect(&self) -> Result<Identity, IdentityError> {
        match &self.behavior {
            WalletBehavior::Authorize => {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                Ok(voter())
            }
            WalletBehavior::AuthorizeAfter(gate) => {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                gate.acquire()
                    .await
                    .map_err(|e| IdentityError::Transport(e.to_string()))?
                    .forget();
                Ok(voter())
            }
            WalletBehavior::Reject => {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                Err(IdentityError::UserRejected("User rejected the request.".into()))
            }
            WalletBehavior::Absent => Err(IdentityError::NoSigningAgent(
                "no provider injected".into(),
            )),
        }
    }
}

pub const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

/// Scripted JSON-RPC node that serves the voting contract's ABI.
#[derive(Default)]
pub struct MockNodeState {
    pub candidates: Vec<(String, u64)>,
    pub voters: HashMap<String, u64>,
    pub accounts: Vec<String>,
    /// `eth_requestAccounts` result; `None` answers with code 4001.
    pub requestable: Option<String>,
    pub receipt_status: String,
    pub receipt_after_polls: usize,
    pub receipt_polls: usize,
    pub malformed_count: bool,
    pub sent: Vec<CallParams>,
    pub methods: Vec<String>,
}

impl MockNodeState {
    pub fn with_candidates(candidates: &[(&str, u64)]) -> Self {
        Self {
            candidates: candidates
                .iter()
                .map(|(name, votes)| (name.to_string(), *votes))
                .collect(),
            receipt_status: "0x1".to_string(),
            ..Self::default()
        }
    }

    fn dispatch(&mut self, method: &str, params: &Value) -> Result<Value, RpcErrorObject> {
        self.methods.push(method.to_string());
        match method {
            "eth_accounts" => Ok(json!(self.accounts)),
            "eth_requestAccounts" => match &self.requestable {
                Some(account) => {
                    self.accounts = vec![account.clone()];
                    Ok(json!(self.accounts))
                }
                None => Err(rpc_error(USER_REJECTED_REQUEST, "User rejected the request.")),
            },
            "eth_call" => self.eth_call(&params[0]),
            "eth_sendTransaction" => {
                let call: CallParams =
                    serde_json::from_value(params[0].clone()).expect("call params");
                let data = abi::decode_hex(&call.data).expect("calldata");
                if data.starts_with(&voteCall::SELECTOR) {
                    let vote = voteCall::abi_decode(&data, true).expect("vote calldata");
                    let id = u64::try_from(vote.candidateId).expect("candidate id");
                    let index = (id as usize).checked_sub(1).expect("candidate id");
                    if let Some(entry) = self.candidates.get_mut(index) {
                        entry.1 += 1;
                    }
                    let from = call.from.clone().unwrap_or_default();
                    self.voters.insert(from, id);
                }
                self.sent.push(call);
                Ok(json!(format!("0x{:064x}", self.sent.len())))
            }
            "eth_getTransactionReceipt" => {
                self.receipt_polls += 1;
                if self.receipt_polls <= self.receipt_after_polls {
                    return Ok(Value::Null);
                }
                Ok(json!({
                    "transactionHash": params[0],
                    "blockNumber": "0x2",
                    "status": self.receipt_status,
                }))
            }
            _ => Err(rpc_error(-32601, "method not found")),
        }
    }

    fn eth_call(&self, call: &Value) -> Result<Value, RpcErrorObject> {
        let data = abi::decode_hex(call["data"].as_str().expect("data")).expect("calldata");
        let encoded = if data.starts_with(&candidatesCountCall::SELECTOR) {
            if self.malformed_count {
                return Ok(json!("0x1234"));
            }
            candidatesCountCall::abi_encode_returns(&(U256::from(self.candidates.len()),))
        } else if data.starts_with(&getCandidateCall::SELECTOR) {
            let id = getCandidateCall::abi_decode(&data, true).expect("getCandidate").id;
            let found = u64::try_from(id)
                .ok()
                .and_then(|id| (id as usize).checked_sub(1))
                .and_then(|index| self.candidates.get(index));
            let Some((name, votes)) = found else {
                return Err(rpc_error(3, "execution reverted: Invalid candidate"));
            };
            getCandidateCall::abi_encode_returns(&(name.clone(), U256::from(*votes)))
        } else if data.starts_with(&votersCall::SELECTOR) {
            let voter = votersCall::abi_decode(&data, true).expect("voters").voter;
            let voted = self
                .voters
                .get(&abi::encode_hex(voter.as_slice()))
                .copied()
                .unwrap_or(0);
            votersCall::abi_encode_returns(&(U256::from(voted),))
        } else {
            return Err(rpc_error(3, "execution reverted"));
        };
        Ok(json!(abi::encode_hex(&encoded)))
    }
}

fn rpc_error(code: i64, message: &str) -> RpcErrorObject {
    RpcErrorObject {
        code,
        message: message.to_string(),
        data: None,
    }
}

#[derive(Clone)]
pub struct MockNode {
    pub state: Arc<Mutex<MockNodeState>>,
}

impl MockNode {
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockNodeState) -> R) -> R {
        f(&mut self.state.lock().expect("mock node state"))
    }
}

async fn handle_rpc(
    State(node): State<MockNode>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let outcome = node.with_state(|state| state.dispatch(&request.method, &request.params));
    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(error) => (None, Some(error)),
    };
    Json(RpcResponse {
        id: json!(request.id),
        result,
        error,
    })
}

pub async fn spawn_mock_node(state: MockNodeState) -> (Url, MockNode) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let node = MockNode {
        state: Arc::new(Mutex::new(state)),
    };
    let app = Router::new()
        .route("/", post(handle_rpc))
        .with_state(node.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let url = Url::parse(&format!("http://{addr}/")).expect("url");
    (url, node)
}

/// An endpoint nothing listens on.
pub async fn closed_endpoint() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    Url::parse(&format!("http://{addr}/")).expect("url")
}
