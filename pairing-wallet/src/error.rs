//! Error types for the wallet client.
//!
//! Every failure is surfaced to the caller; nothing here retries on its own.
//! The coordinator guarantees that a failed operation leaves it either in
//! `Ready` or in the state it was in before the call.

use thiserror::Error;

use crate::pairing::PairingError;

/// Result alias used across the library.
pub type WalletResult<T> = Result<T, WalletError>;

/// Errors returned by the coordinator, submitter and RPC client.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The pairing client could not be initialized.
    #[error("pairing client initialization failed: {0}")]
    InitError(String),

    /// An operation was attempted before `initialize()` succeeded, or after
    /// the coordinator was shut down.
    #[error("pairing client not initialized")]
    NotInitialized,

    /// `connect` was called while a session is active.
    #[error("a wallet session is already active")]
    AlreadyConnected,

    /// `connect` was called while an earlier proposal is unresolved.
    #[error("a pairing proposal is already in flight")]
    ProposalInFlight,

    /// The wallet did not answer the proposal before the approval timeout.
    #[error("pairing proposal expired before the wallet approved it")]
    ProposalExpired,

    /// The caller abandoned the proposal while waiting for approval.
    #[error("pairing proposal was cancelled")]
    ProposalCancelled,

    /// `await_approval` was called with no proposal to wait on.
    #[error("no pairing proposal is pending")]
    NoPendingProposal,

    /// Recipient is not `0x` followed by 40 hex characters.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Amount is not a positive finite decimal representable in base units.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount exceeds the supplied balance snapshot.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Requested amount, formatted in ether.
        requested: String,
        /// Available balance, formatted in ether.
        available: String,
    },

    /// No session is active.
    #[error("no active wallet session")]
    NoActiveSession,

    /// The remote wallet declined the request or proposal.
    #[error("wallet rejected the request: {0}")]
    WalletRejected(String),

    /// The session does not grant the method on the target chain.
    #[error("method {method} is not authorized on {chain_id}")]
    MethodNotAuthorized {
        /// Requested JSON-RPC method.
        method: String,
        /// CAIP-2 chain id the request targeted.
        chain_id: String,
    },

    /// Chain RPC read failed (network, timeout, HTTP status, JSON-RPC error
    /// or malformed result).
    #[error("rpc error: {0}")]
    RpcError(String),

    /// Session data received from the pairing client failed validation.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The pairing client failed for a reason other than a wallet refusal.
    #[error("pairing client error: {0}")]
    Pairing(String),
}

impl From<PairingError> for WalletError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::Rejected { code, message } => {
                WalletError::WalletRejected(format!("{} (code {})", message, code))
            }
            PairingError::Expired => WalletError::ProposalExpired,
            PairingError::InvalidSession(msg) => WalletError::InvalidSession(msg),
            other => WalletError::Pairing(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WalletError::RpcError(format!("request timed out: {}", err))
        } else {
            WalletError::RpcError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            WalletError::ProposalInFlight.to_string(),
            "a pairing proposal is already in flight"
        );
        assert_eq!(
            WalletError::InvalidAddress("0x12".to_string()).to_string(),
            "invalid address: 0x12"
        );

        let err = WalletError::InsufficientBalance {
            requested: "2.0".to_string(),
            available: "1.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "insufficient balance: requested 2.0, available 1.0"
        );
    }

    #[test]
    fn test_from_pairing_error() {
        let err: WalletError = PairingError::Rejected {
            code: 5000,
            message: "User rejected".to_string(),
        }
        .into();
        assert!(matches!(err, WalletError::WalletRejected(_)));

        let err: WalletError = PairingError::Expired.into();
        assert!(matches!(err, WalletError::ProposalExpired));

        let err: WalletError = PairingError::Transport("relay down".to_string()).into();
        assert!(matches!(err, WalletError::Pairing(_)));
    }
}
