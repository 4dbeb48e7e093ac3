//! In-process pairing client with a simulated wallet.
//!
//! [`LoopbackPairingClient`] implements [`PairingClient`] without a relay:
//! proposals, sessions and requests live in shared memory, and a
//! [`LoopbackWallet`] handle plays the wallet side (approve, reject, update,
//! delete, answer requests). The CLI `demo` command and the test suite both
//! drive the coordinator through it.

use async_trait::async_trait;
use futures::FutureExt;
use rand::RngCore;
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{
    DisconnectReason, PairingClient, PairingError, PairingUri, Proposal, SessionEventKind,
    SessionRequest, USER_REJECTED_CODE,
};
use crate::session::{Metadata, Namespace, RequiredNamespaces, Session};

/// How long an approved session stays valid on the wallet side.
const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Address the simulated wallet holds in the demo and the tests.
pub const SAMPLE_ADDRESS: &str = "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B";

/// A request the wallet received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub topic: String,
    pub chain_id: String,
    pub request: SessionRequest,
}

struct PendingProposal {
    topic: String,
    required: RequiredNamespaces,
    responder: oneshot::Sender<Result<Session, PairingError>>,
}

#[derive(Default)]
struct LoopbackState {
    initialized: bool,
    project_id: Option<String>,
    app_metadata: Option<Metadata>,
    init_failure: Option<String>,
    wallet_metadata: Metadata,
    addresses: Vec<String>,
    proposals: VecDeque<PendingProposal>,
    sessions: BTreeMap<String, Session>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEventKind>>,
    scripted_responses: VecDeque<Result<Value, PairingError>>,
    requests: Vec<RecordedRequest>,
    disconnects: Vec<(String, DisconnectReason)>,
    disconnect_failure: Option<String>,
    stall_disconnects: bool,
}

impl LoopbackState {
    /// Forget proposals the application stopped waiting for.
    fn prune_proposals(&mut self) {
        self.proposals.retain(|p| !p.responder.is_closed());
    }

    fn next_proposal(&mut self) -> Result<PendingProposal, PairingError> {
        self.prune_proposals();
        self.proposals
            .pop_front()
            .ok_or_else(|| PairingError::Transport("no pending proposal".to_string()))
    }

    fn broadcast(&mut self, event: SessionEventKind) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    // A panic while holding the lock only happens in a failing test; the
    // state is still usable.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Pairing client whose "relay" is shared memory.
#[derive(Clone)]
pub struct LoopbackPairingClient {
    state: Arc<Mutex<LoopbackState>>,
}

/// The wallet side of a [`LoopbackPairingClient`].
#[derive(Clone)]
pub struct LoopbackWallet {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackPairingClient {
    /// Create a client paired with a simulated wallet holding `addresses`.
    pub fn new(wallet_metadata: Metadata, addresses: Vec<String>) -> (Self, LoopbackWallet) {
        let state = Arc::new(Mutex::new(LoopbackState {
            wallet_metadata,
            addresses,
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            LoopbackWallet { state },
        )
    }
}

#[async_trait]
impl PairingClient for LoopbackPairingClient {
    async fn initialize(&self, project_id: &str, metadata: &Metadata) -> Result<(), PairingError> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.init_failure.take() {
            return Err(PairingError::Init(reason));
        }
        if project_id.is_empty() {
            return Err(PairingError::Init("project id is empty".to_string()));
        }
        state.initialized = true;
        state.project_id = Some(project_id.to_string());
        state.app_metadata = Some(metadata.clone());
        Ok(())
    }

    async fn connect(&self, required: &RequiredNamespaces) -> Result<Proposal, PairingError> {
        let mut state = lock(&self.state);
        if !state.initialized {
            return Err(PairingError::NotInitialized);
        }

        let topic = random_hex(32);
        let uri = PairingUri::new(topic.clone(), random_hex(32)).to_string();
        let (responder, rx) = oneshot::channel();
        state.prune_proposals();
        state.proposals.push_back(PendingProposal {
            topic,
            required: required.clone(),
            responder,
        });
        debug!("loopback: proposal created ({} pending)", state.proposals.len());

        let approval = async move {
            rx.await
                .map_err(|_| PairingError::Transport("wallet went away".to_string()))?
        }
        .boxed();

        Ok(Proposal { uri, approval })
    }

    async fn request(
        &self,
        topic: &str,
        chain_id: &str,
        request: SessionRequest,
    ) -> Result<Value, PairingError> {
        let mut state = lock(&self.state);
        if !state.sessions.contains_key(topic) {
            return Err(PairingError::UnknownTopic(topic.to_string()));
        }
        state.requests.push(RecordedRequest {
            topic: topic.to_string(),
            chain_id: chain_id.to_string(),
            request: request.clone(),
        });

        if let Some(response) = state.scripted_responses.pop_front() {
            return response;
        }

        match request.method.as_str() {
            "eth_sendTransaction" => Ok(json!(format!("0x{}", random_hex(32)))),
            "personal_sign" => Ok(json!(format!("0x{}", random_hex(65)))),
            other => Err(PairingError::Rejected {
                code: 5101,
                message: format!("Unsupported method: {}", other),
            }),
        }
    }

    async fn disconnect(&self, topic: &str, reason: &DisconnectReason) -> Result<(), PairingError> {
        {
            let mut state = lock(&self.state);
            state.disconnects.push((topic.to_string(), reason.clone()));
            if !state.stall_disconnects {
                if let Some(failure) = state.disconnect_failure.clone() {
                    return Err(PairingError::Transport(failure));
                }
                return state
                    .sessions
                    .remove(topic)
                    .map(|_| ())
                    .ok_or_else(|| PairingError::UnknownTopic(topic.to_string()));
            }
        }
        debug!("loopback: leaving disconnect of {} unanswered", topic);
        futures::future::pending().await
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, PairingError> {
        let state = lock(&self.state);
        if !state.initialized {
            return Err(PairingError::NotInitialized);
        }
        Ok(state.sessions.values().cloned().collect())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEventKind> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).subscribers.push(tx);
        rx
    }
}

impl LoopbackWallet {
    /// Number of proposals waiting for an answer.
    pub fn pending_proposals(&self) -> usize {
        let mut state = lock(&self.state);
        state.prune_proposals();
        state.proposals.len()
    }

    /// Approve the oldest proposal the application is still waiting on.
    ///
    /// The session is granted every required namespace, with one account per
    /// chain and wallet address. Fails if no such proposal exists, in which
    /// case no session is created.
    pub fn approve(&self) -> Result<Session, PairingError> {
        let mut state = lock(&self.state);
        let proposal = state.next_proposal()?;

        let namespaces = proposal
            .required
            .iter()
            .map(|(name, requirement)| {
                let accounts = requirement
                    .chains
                    .iter()
                    .flat_map(|chain| {
                        state
                            .addresses
                            .iter()
                            .map(move |address| format!("{}:{}", chain, address))
                    })
                    .collect();
                (
                    name.clone(),
                    Namespace {
                        accounts,
                        chains: requirement.chains.clone(),
                        methods: requirement.methods.clone(),
                        events: requirement.events.clone(),
                    },
                )
            })
            .collect();

        let session = Session {
            topic: proposal.topic,
            namespaces,
            peer: state.wallet_metadata.clone(),
            expiry: Some(chrono::Utc::now().timestamp() + SESSION_TTL_SECS),
        };

        proposal
            .responder
            .send(Ok(session.clone()))
            .map_err(|_| PairingError::Transport("proposal abandoned by application".to_string()))?;

        state.sessions.insert(session.topic.clone(), session.clone());
        Ok(session)
    }

    /// Approve the oldest pending proposal after `delay`.
    pub fn approve_after(&self, delay: Duration) -> tokio::task::JoinHandle<Result<Session, PairingError>> {
        let wallet = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            wallet.approve()
        })
    }

    /// Reject the oldest proposal the application is still waiting on.
    pub fn reject(&self, message: &str) -> Result<(), PairingError> {
        let proposal = lock(&self.state).next_proposal()?;
        proposal
            .responder
            .send(Err(PairingError::Rejected {
                code: USER_REJECTED_CODE,
                message: message.to_string(),
            }))
            .map_err(|_| PairingError::Transport("proposal abandoned by application".to_string()))
    }

    /// Store a session as if it had been approved in an earlier run.
    pub fn restore_session(&self, session: Session) {
        lock(&self.state)
            .sessions
            .insert(session.topic.clone(), session);
    }

    /// Change a session's namespaces and notify the application.
    pub fn update_session(
        &self,
        topic: &str,
        namespaces: BTreeMap<String, Namespace>,
    ) -> Result<(), PairingError> {
        let mut state = lock(&self.state);
        let session = state
            .sessions
            .get_mut(topic)
            .ok_or_else(|| PairingError::UnknownTopic(topic.to_string()))?;
        session.merge_namespaces(namespaces.clone());
        state.broadcast(SessionEventKind::Update {
            topic: topic.to_string(),
            namespaces,
        });
        Ok(())
    }

    /// End a session from the wallet side and notify the application.
    pub fn delete_session(&self, topic: &str) -> Result<(), PairingError> {
        let mut state = lock(&self.state);
        state
            .sessions
            .remove(topic)
            .ok_or_else(|| PairingError::UnknownTopic(topic.to_string()))?;
        state.broadcast(SessionEventKind::Delete {
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Emit a namespace event such as `accountsChanged`.
    pub fn emit_event(&self, topic: &str, chain_id: &str, name: &str, data: Value) {
        lock(&self.state).broadcast(SessionEventKind::Event {
            topic: topic.to_string(),
            chain_id: chain_id.to_string(),
            name: name.to_string(),
            data,
        });
    }

    /// Answer the next request with `response` instead of the default.
    pub fn respond_next(&self, response: Result<Value, PairingError>) {
        lock(&self.state).scripted_responses.push_back(response);
    }

    /// Reject the next request as a user refusal.
    pub fn reject_next_request(&self, message: &str) {
        self.respond_next(Err(PairingError::Rejected {
            code: USER_REJECTED_CODE,
            message: message.to_string(),
        }));
    }

    /// Make the next `initialize` call fail.
    pub fn fail_next_initialize(&self, reason: &str) {
        lock(&self.state).init_failure = Some(reason.to_string());
    }

    /// Make `disconnect` calls fail (the session is kept on the wallet side).
    pub fn fail_disconnects(&self, reason: Option<&str>) {
        lock(&self.state).disconnect_failure = reason.map(str::to_string);
    }

    /// Leave every later `disconnect` call unanswered.
    pub fn stall_disconnects(&self) {
        lock(&self.state).stall_disconnects = true;
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Disconnects received so far.
    pub fn disconnects(&self) -> Vec<(String, DisconnectReason)> {
        lock(&self.state).disconnects.clone()
    }

    /// Sessions the wallet considers live.
    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.state).sessions.values().cloned().collect()
    }

    /// Subscribers whose receiver is still alive.
    pub fn live_subscribers(&self) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Project id and metadata the application initialized with.
    pub fn app_registration(&self) -> Option<(String, Metadata)> {
        let state = lock(&self.state);
        state.project_id.clone().zip(state.app_metadata.clone())
    }
}
