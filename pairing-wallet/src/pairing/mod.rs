//! Pairing client interface.
//!
//! The pairing protocol (relay transport, key agreement, session storage) is
//! provided by an external client. This module defines the seam the rest of
//! the crate talks to: the [`PairingClient`] trait, the proposal and event
//! types it produces, and the `wc:` pairing URI format.
//!
//! [`loopback`] contains an in-process implementation with a simulated
//! wallet on the other end.

pub mod loopback;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{Metadata, Namespace, RequiredNamespaces, Session};

/// Reason code sent when the user ends a session.
pub const USER_DISCONNECTED_CODE: i64 = 6000;

/// Reason code a wallet sends when the user declines a request.
pub const USER_REJECTED_CODE: i64 = 5000;

/// Errors reported by a pairing client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("client not initialized")]
    NotInitialized,

    /// The wallet declined a proposal or request.
    #[error("rejected by wallet: {message} (code {code})")]
    Rejected { code: i64, message: String },

    /// The relay expired the proposal.
    #[error("proposal expired")]
    Expired,

    #[error("unknown session topic: {0}")]
    UnknownTopic(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Reason attached to a disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub code: i64,
    pub message: String,
}

impl DisconnectReason {
    /// The reason used when the user presses "disconnect".
    pub fn user_disconnected() -> Self {
        Self {
            code: USER_DISCONNECTED_CODE,
            message: "User disconnected".to_string(),
        }
    }
}

impl Default for DisconnectReason {
    fn default() -> Self {
        Self::user_disconnected()
    }
}

/// A JSON-RPC request routed to the wallet over a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub method: String,
    pub params: Value,
}

/// Events pushed by the pairing client after a session is established.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// The wallet changed the namespaces of a session.
    Update {
        topic: String,
        namespaces: BTreeMap<String, Namespace>,
    },
    /// The wallet ended a session.
    Delete { topic: String },
    /// A namespace event such as `accountsChanged`.
    Event {
        topic: String,
        chain_id: String,
        name: String,
        data: Value,
    },
}

impl SessionEventKind {
    pub fn topic(&self) -> &str {
        match self {
            SessionEventKind::Update { topic, .. }
            | SessionEventKind::Delete { topic }
            | SessionEventKind::Event { topic, .. } => topic,
        }
    }
}

/// Resolves once the wallet answers a proposal.
pub type Approval = BoxFuture<'static, Result<Session, PairingError>>;

/// A freshly created pairing proposal.
pub struct Proposal {
    /// URI to hand to the wallet (deep link or QR code).
    pub uri: String,
    /// Resolves to the approved session.
    pub approval: Approval,
}

impl fmt::Debug for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proposal")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

/// The external pairing-protocol client.
#[async_trait]
pub trait PairingClient: Send + Sync + 'static {
    /// Bring the client up for a project.
    async fn initialize(&self, project_id: &str, metadata: &Metadata) -> Result<(), PairingError>;

    /// Create a pairing proposal for the given requirements.
    async fn connect(&self, required: &RequiredNamespaces) -> Result<Proposal, PairingError>;

    /// Route a request to the wallet on `topic`, targeting `chain_id`.
    async fn request(
        &self,
        topic: &str,
        chain_id: &str,
        request: SessionRequest,
    ) -> Result<Value, PairingError>;

    /// End the session on `topic`.
    async fn disconnect(&self, topic: &str, reason: &DisconnectReason) -> Result<(), PairingError>;

    /// Sessions the client has persisted from earlier runs.
    async fn active_sessions(&self) -> Result<Vec<Session>, PairingError>;

    /// Receive session events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEventKind>;
}

/// A parsed `wc:` pairing URI.
///
/// ```text
/// wc:<topic>@<version>?relay-protocol=irn&symKey=<hex>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    pub version: u32,
    pub relay_protocol: String,
    pub sym_key: String,
}

impl PairingUri {
    /// Build a URI with the `irn` relay protocol.
    pub fn new(topic: impl Into<String>, sym_key: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            version: 2,
            relay_protocol: "irn".to_string(),
            sym_key: sym_key.into(),
        }
    }

    /// Parse a pairing URI.
    pub fn parse(uri: &str) -> Result<Self, PairingError> {
        let invalid = |why: &str| PairingError::Transport(format!("invalid pairing uri ({}): {}", why, uri));

        let url = url::Url::parse(uri).map_err(|_| invalid("not a uri"))?;
        if url.scheme() != "wc" {
            return Err(invalid("scheme must be wc"));
        }

        let (topic, version) = url.path().split_once('@').ok_or_else(|| invalid("missing version"))?;
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }
        let version: u32 = version.parse().map_err(|_| invalid("bad version"))?;

        let mut relay_protocol = None;
        let mut sym_key = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "symKey" => sym_key = Some(value.into_owned()),
                _ => {}
            }
        }

        let sym_key = sym_key.ok_or_else(|| invalid("missing symKey"))?;
        if hex::decode(&sym_key).map(|k| k.len()) != Ok(32) {
            return Err(invalid("symKey must be 32 bytes of hex"));
        }

        Ok(Self {
            topic: topic.to_string(),
            version,
            relay_protocol: relay_protocol.ok_or_else(|| invalid("missing relay-protocol"))?,
            sym_key,
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wc:{}@{}?relay-protocol={}&symKey={}",
            self.topic, self.version, self.relay_protocol, self.sym_key
        )
    }
}
