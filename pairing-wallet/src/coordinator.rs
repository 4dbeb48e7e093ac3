//! Session lifecycle coordinator.
//!
//! Owns the one wallet session the application may have and walks it through
//! its lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Ready ──connect──▶ Proposing
//!                                 ▲                   │ await_approval
//!                                 │                   ▼
//!       disconnect / delete / ────┴──────────── AwaitingApproval
//!       reject / cancel / expiry                      │ approved
//!                                                     ▼
//!                                                 Connected
//! ```
//!
//! `shutdown` moves any state to the terminal `Disconnected`.
//!
//! All transitions, including remote session events, go through a single
//! async mutex. Readers never take that lock: every committed change is
//! published as an immutable [`CoordinatorSnapshot`] on a watch channel.

use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    error::{WalletError, WalletResult},
    pairing::{Approval, DisconnectReason, PairingClient, SessionEventKind},
    session::{default_required_namespaces, Metadata, RequiredNamespaces, Session},
};

/// Default time to wait for a wallet to answer a proposal.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// How long `disconnect` waits for the wallet to acknowledge.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Ready,
    Proposing,
    AwaitingApproval,
    Connected,
    Disconnected,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Uninitialized => "uninitialized",
            CoordinatorState::Ready => "ready",
            CoordinatorState::Proposing => "proposing",
            CoordinatorState::AwaitingApproval => "awaiting approval",
            CoordinatorState::Connected => "connected",
            CoordinatorState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What readers see: the state, the session, and the URI of an open
/// proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub state: CoordinatorState,
    pub session: Option<Arc<Session>>,
    pub pending_uri: Option<String>,
}

/// A proposal handed back by `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingProposal {
    /// Monotonic id, unique per coordinator.
    pub id: u64,
    /// Pairing URI for the wallet.
    pub uri: String,
}

/// Settings the coordinator needs from the application configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub project_id: String,
    pub metadata: Metadata,
    pub required_namespaces: RequiredNamespaces,
    pub approval_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(project_id: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            project_id: project_id.into(),
            metadata,
            required_namespaces: default_required_namespaces(),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            metadata: config.metadata.clone(),
            required_namespaces: config.required_namespaces.clone(),
            approval_timeout: Duration::from_secs(config.approval_timeout_secs),
        }
    }
}

struct PendingProposal {
    id: u64,
    uri: String,
    approval: Option<Approval>,
    cancel: Option<oneshot::Sender<()>>,
}

struct Inner {
    state: CoordinatorState,
    session: Option<Arc<Session>>,
    proposal: Option<PendingProposal>,
    next_proposal_id: u64,
    /// Events received while a proposal is open, replayed once it settles.
    deferred: Vec<SessionEventKind>,
}

impl Inner {
    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            state: self.state,
            session: self.session.clone(),
            pending_uri: self.proposal.as_ref().map(|p| p.uri.clone()),
        }
    }

    /// Drop the open proposal, waking anyone blocked in `await_approval`.
    fn abandon_proposal(&mut self) -> bool {
        self.deferred.clear();
        match self.proposal.take() {
            Some(mut proposal) => {
                if let Some(cancel) = proposal.cancel.take() {
                    let _ = cancel.send(());
                }
                debug!("Abandoned proposal {}", proposal.id);
                true
            }
            None => false,
        }
    }

    /// Give up on proposal `id` if it is still the open one.
    fn release_proposal(&mut self, id: u64) -> bool {
        if self.proposal.as_ref().map(|p| p.id) != Some(id) {
            return false;
        }
        self.abandon_proposal();
        self.state = CoordinatorState::Ready;
        info!("Proposal {} dropped by its waiter", id);
        true
    }

    /// Apply a remote event. Returns whether anything changed.
    fn apply_event(&mut self, event: SessionEventKind) -> bool {
        // The session an open proposal settles into is not known yet.
        if self.session.is_none()
            && matches!(
                self.state,
                CoordinatorState::Proposing | CoordinatorState::AwaitingApproval
            )
        {
            debug!("Deferring event for {} until the proposal settles", event.topic());
            self.deferred.push(event);
            return false;
        }

        let current_topic = self.session.as_ref().map(|s| s.topic.clone());
        if current_topic.as_deref() != Some(event.topic()) {
            debug!("Ignoring event for unknown topic {}", event.topic());
            return false;
        }

        match event {
            SessionEventKind::Update { topic, namespaces } => {
                let Some(current) = self.session.as_ref() else {
                    return false;
                };
                let mut updated = Session::clone(current);
                updated.merge_namespaces(namespaces);
                if let Err(e) = updated.validate() {
                    warn!("Ignoring invalid update for session {}: {}", topic, e);
                    return false;
                }
                info!("Session {} updated", topic);
                self.session = Some(Arc::new(updated));
                true
            }
            SessionEventKind::Delete { topic } => {
                info!("Session {} deleted by wallet", topic);
                self.session = None;
                self.state = CoordinatorState::Ready;
                true
            }
            SessionEventKind::Event {
                topic,
                chain_id,
                name,
                data,
            } => {
                info!("Session event {} on {} ({}): {}", name, chain_id, topic, data);
                false
            }
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    snapshots: watch::Sender<CoordinatorSnapshot>,
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(inner.snapshot());
    }
}

/// Releases the proposal if an `await_approval` call is dropped before it
/// commits.
struct WaitGuard {
    shared: Arc<Shared>,
    id: u64,
    armed: bool,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            if inner.release_proposal(id) {
                self.shared.publish(&inner);
            }
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = self.shared.clone();
                runtime.spawn(async move {
                    let mut inner = shared.inner.lock().await;
                    if inner.release_proposal(id) {
                        shared.publish(&inner);
                    }
                });
            }
            Err(_) => warn!("Proposal {} left open: no runtime to release it", id),
        }
    }
}

/// Coordinates pairing, approval and teardown of the wallet session.
pub struct SessionCoordinator<C: PairingClient> {
    client: Arc<C>,
    config: CoordinatorConfig,
    shared: Arc<Shared>,
    events: StdMutex<Option<JoinHandle<()>>>,
}

impl<C: PairingClient> SessionCoordinator<C> {
    /// Create an uninitialized coordinator around a pairing client.
    pub fn new(client: Arc<C>, config: CoordinatorConfig) -> Self {
        let inner = Inner {
            state: CoordinatorState::Uninitialized,
            session: None,
            proposal: None,
            next_proposal_id: 1,
            deferred: Vec::new(),
        };
        let (snapshots, _) = watch::channel(inner.snapshot());

        Self {
            client,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                snapshots,
            }),
            events: StdMutex::new(None),
        }
    }

    /// The pairing client, for routing requests over the session.
    pub fn client(&self) -> Arc<C> {
        self.client.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.snapshots.borrow().state
    }

    /// The active session, if any. The returned value never changes; call
    /// again for the latest.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.shared.snapshots.borrow().session.clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Initialize the pairing client and restore a persisted session.
    ///
    /// Failure leaves the coordinator `Uninitialized` so the caller can
    /// retry. Calling this again after success returns the current state.
    pub async fn initialize(&self) -> WalletResult<CoordinatorState> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            CoordinatorState::Uninitialized => {}
            CoordinatorState::Disconnected => return Err(WalletError::NotInitialized),
            state => return Ok(state),
        }

        info!("Initializing pairing client for project {}", self.config.project_id);
        self.client
            .initialize(&self.config.project_id, &self.config.metadata)
            .await
            .map_err(|e| WalletError::InitError(e.to_string()))?;

        let sessions = self
            .client
            .active_sessions()
            .await
            .map_err(|e| WalletError::InitError(e.to_string()))?;

        self.start_event_loop(self.client.subscribe());

        let restored = sessions.into_iter().find(|session| match session.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping persisted session {}: {}", session.topic, e);
                false
            }
        });

        match restored {
            Some(session) => {
                info!("Restored session {} with {}", session.topic, session.peer.name);
                inner.session = Some(Arc::new(session));
                inner.state = CoordinatorState::Connected;
            }
            None => inner.state = CoordinatorState::Ready,
        }

        self.shared.publish(&inner);
        Ok(inner.state)
    }

    /// Create a pairing proposal for the configured namespaces.
    pub async fn connect_default(&self) -> WalletResult<PairingProposal> {
        let required = self.config.required_namespaces.clone();
        self.connect(&required).await
    }

    /// Create a pairing proposal. Valid only from `Ready`.
    pub async fn connect(&self, required: &RequiredNamespaces) -> WalletResult<PairingProposal> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            CoordinatorState::Ready => {}
            CoordinatorState::Uninitialized | CoordinatorState::Disconnected => {
                return Err(WalletError::NotInitialized)
            }
            CoordinatorState::Connected => return Err(WalletError::AlreadyConnected),
            CoordinatorState::Proposing | CoordinatorState::AwaitingApproval => {
                return Err(WalletError::ProposalInFlight)
            }
        }

        let proposal = self.client.connect(required).await?;

        let id = inner.next_proposal_id;
        inner.next_proposal_id += 1;
        inner.proposal = Some(PendingProposal {
            id,
            uri: proposal.uri.clone(),
            approval: Some(proposal.approval),
            cancel: None,
        });
        inner.state = CoordinatorState::Proposing;
        self.shared.publish(&inner);

        info!("Created pairing proposal {}", id);
        Ok(PairingProposal {
            id,
            uri: proposal.uri,
        })
    }

    /// Wait for the wallet to answer the open proposal.
    ///
    /// Ends in `Connected` on approval. Rejection, cancellation and expiry
    /// all discard the proposal and return to `Ready`, and so does dropping
    /// the returned future before it completes.
    pub async fn await_approval(&self) -> WalletResult<Arc<Session>> {
        let (id, approval, cancelled) = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                CoordinatorState::Proposing => {}
                CoordinatorState::AwaitingApproval => return Err(WalletError::ProposalInFlight),
                CoordinatorState::Uninitialized | CoordinatorState::Disconnected => {
                    return Err(WalletError::NotInitialized)
                }
                _ => return Err(WalletError::NoPendingProposal),
            }

            let (cancel, cancelled) = oneshot::channel();
            let proposal = inner
                .proposal
                .as_mut()
                .ok_or(WalletError::NoPendingProposal)?;
            let approval = proposal
                .approval
                .take()
                .ok_or(WalletError::NoPendingProposal)?;
            proposal.cancel = Some(cancel);
            let id = proposal.id;

            inner.state = CoordinatorState::AwaitingApproval;
            self.shared.publish(&inner);
            (id, approval, cancelled)
        };

        let mut guard = WaitGuard {
            shared: self.shared.clone(),
            id,
            armed: true,
        };

        debug!("Waiting for approval of proposal {}", id);
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.config.approval_timeout, approval) => match result {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(WalletError::from(e)),
                Err(_) => Err(WalletError::ProposalExpired),
            },
            _ = cancelled => Err(WalletError::ProposalCancelled),
        };

        let mut inner = self.shared.inner.lock().await;
        guard.armed = false;
        let is_current = inner.proposal.as_ref().map(|p| p.id) == Some(id);
        if !is_current {
            if outcome.is_ok() {
                warn!("Discarding late approval for abandoned proposal {}", id);
            }
            return match outcome {
                Ok(_) => Err(WalletError::ProposalCancelled),
                Err(e) => Err(e),
            };
        }

        inner.proposal = None;
        let deferred = std::mem::take(&mut inner.deferred);
        let result = outcome.and_then(|session| {
            session
                .validate()
                .map_err(WalletError::InvalidSession)
                .map(|()| Arc::new(session))
        });

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                info!("Proposal {} failed: {}", id, e);
                inner.state = CoordinatorState::Ready;
                self.shared.publish(&inner);
                return Err(e);
            }
        };

        info!(
            "Proposal {} approved by {} (session {})",
            id, session.peer.name, session.topic
        );
        inner.session = Some(session.clone());
        inner.state = CoordinatorState::Connected;
        for event in deferred.into_iter().filter(|e| e.topic() == session.topic) {
            inner.apply_event(event);
        }
        self.shared.publish(&inner);

        inner.session.clone().ok_or_else(|| {
            WalletError::InvalidSession(format!(
                "session {} was deleted by the wallet",
                session.topic
            ))
        })
    }

    /// Abandon the open proposal, if any. A late approval for it is
    /// discarded.
    pub async fn cancel_proposal(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if !inner.abandon_proposal() {
            return false;
        }
        inner.state = CoordinatorState::Ready;
        self.shared.publish(&inner);
        info!("Pairing proposal cancelled");
        true
    }

    /// End the active session.
    ///
    /// Local state is cleared before the wallet is told, so a wallet that
    /// never answers cannot hold the coordinator. The remote call is bounded
    /// by [`DISCONNECT_TIMEOUT`].
    pub async fn disconnect(&self, reason: DisconnectReason) -> WalletResult<()> {
        let session = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                CoordinatorState::Connected => {}
                CoordinatorState::Uninitialized | CoordinatorState::Disconnected => {
                    return Err(WalletError::NotInitialized)
                }
                _ => return Err(WalletError::NoActiveSession),
            }

            let session = inner.session.take().ok_or(WalletError::NoActiveSession)?;
            inner.state = CoordinatorState::Ready;
            self.shared.publish(&inner);
            session
        };

        let remote = self.client.disconnect(&session.topic, &reason);
        match tokio::time::timeout(DISCONNECT_TIMEOUT, remote).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Wallet did not acknowledge disconnect of {}: {}", session.topic, e)
            }
            Err(_) => warn!(
                "Wallet did not answer disconnect of {} within {:?}",
                session.topic, DISCONNECT_TIMEOUT
            ),
        }

        info!("Disconnected session {} ({})", session.topic, reason.message);
        Ok(())
    }

    /// Stop listening for events and drop local state. The pairing client
    /// keeps its persisted sessions, so a new coordinator can restore them.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.take_event_loop() {
            handle.abort();
            // Wait until the task is gone so the event receiver is dropped.
            let _ = handle.await;
        }

        let mut inner = self.shared.inner.lock().await;
        inner.abandon_proposal();
        inner.session = None;
        inner.state = CoordinatorState::Disconnected;
        self.shared.publish(&inner);
        info!("Coordinator shut down");
    }

    fn start_event_loop(&self, mut events: mpsc::UnboundedReceiver<SessionEventKind>) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let mut inner = shared.inner.lock().await;
                if inner.apply_event(event) {
                    shared.publish(&inner);
                }
            }
            debug!("Session event stream closed");
        });

        if let Ok(mut slot) = self.events.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn take_event_loop(&self) -> Option<JoinHandle<()>> {
        self.events.lock().ok().and_then(|mut slot| slot.take())
    }

    fn stop_event_loop(&self) {
        if let Some(handle) = self.take_event_loop() {
            handle.abort();
        }
    }
}

impl<C: PairingClient> Drop for SessionCoordinator<C> {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}
