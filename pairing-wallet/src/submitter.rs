//! Transaction submission through the wallet session.
//!
//! The submitter never signs anything itself. It validates the user's input,
//! builds an `eth_sendTransaction` payload and hands it to the wallet over
//! the active session; the wallet signs and broadcasts, and answers with the
//! transaction hash. Confirmation on chain is not awaited.

use once_cell::sync::Lazy;
use primitive_types::U256;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{WalletError, WalletResult},
    pairing::{PairingClient, SessionRequest},
    session::Session,
    units::{format_ether, parse_ether, to_hex_quantity, UnitsError},
};

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid address regex"));

/// Whether `address` is `0x` followed by exactly 40 hex characters.
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// Payload of an `eth_sendTransaction` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    /// Value in wei as a hex quantity.
    pub value: String,
    /// Gas limit as a hex quantity.
    pub gas: String,
}

impl TransactionRequest {
    /// A value transfer of `value` wei.
    pub fn transfer(from: &str, to: &str, value: U256, gas_limit: u64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            value: to_hex_quantity(value),
            gas: to_hex_quantity(U256::from(gas_limit)),
        }
    }
}

/// Sends transactions and signing requests to the connected wallet.
pub struct TransactionSubmitter<C: PairingClient> {
    client: Arc<C>,
    chain_id: String,
    gas_limit: u64,
}

impl<C: PairingClient> TransactionSubmitter<C> {
    pub fn new(client: Arc<C>, chain_id: impl Into<String>) -> Self {
        Self {
            client,
            chain_id: chain_id.into(),
            gas_limit: TRANSFER_GAS_LIMIT,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Validate a transfer and build its payload without sending it.
    ///
    /// Checks, in order: addresses, amount, balance.
    pub fn prepare(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        balance: U256,
    ) -> WalletResult<TransactionRequest> {
        if !is_valid_address(to) {
            return Err(WalletError::InvalidAddress(to.to_string()));
        }
        if !is_valid_address(from) {
            return Err(WalletError::InvalidAddress(from.to_string()));
        }

        let value = parse_ether(amount).map_err(|e| match e {
            UnitsError::Empty => WalletError::InvalidAmount("amount is empty".to_string()),
            other => WalletError::InvalidAmount(format!("{:?}: {}", amount, other)),
        })?;
        if value.is_zero() {
            return Err(WalletError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        if value > balance {
            return Err(WalletError::InsufficientBalance {
                requested: format_ether(value),
                available: format_ether(balance),
            });
        }

        Ok(TransactionRequest::transfer(from, to, value, self.gas_limit))
    }

    /// Ask the wallet to sign and broadcast a transfer of `amount` ether.
    ///
    /// `balance` is the caller's latest balance snapshot in wei. Returns the
    /// transaction hash reported by the wallet.
    pub async fn send(
        &self,
        session: Option<&Session>,
        from: &str,
        to: &str,
        amount: &str,
        balance: U256,
    ) -> WalletResult<String> {
        let tx = self.prepare(from, to, amount, balance)?;
        let session = session.ok_or(WalletError::NoActiveSession)?;
        self.check_method(session, "eth_sendTransaction")?;

        info!("Requesting transfer of {} ETH to {}", amount.trim(), tx.to);
        let params = serde_json::to_value([&tx])
            .map_err(|e| WalletError::Pairing(format!("failed to encode transaction: {}", e)))?;
        let result = self
            .request(session, "eth_sendTransaction", params)
            .await?;

        let hash = expect_string(result, "transaction hash")?;
        info!("Wallet returned transaction {}", hash);
        Ok(hash)
    }

    /// Ask the wallet to sign `message` with `address` (`personal_sign`).
    pub async fn sign_message(
        &self,
        session: Option<&Session>,
        address: &str,
        message: &str,
    ) -> WalletResult<String> {
        if !is_valid_address(address) {
            return Err(WalletError::InvalidAddress(address.to_string()));
        }
        let session = session.ok_or(WalletError::NoActiveSession)?;
        self.check_method(session, "personal_sign")?;

        let result = self
            .request(session, "personal_sign", json!([message, address]))
            .await?;
        expect_string(result, "signature")
    }

    fn check_method(&self, session: &Session, method: &str) -> WalletResult<()> {
        if session.allows(&self.chain_id, method) {
            Ok(())
        } else {
            Err(WalletError::MethodNotAuthorized {
                method: method.to_string(),
                chain_id: self.chain_id.clone(),
            })
        }
    }

    async fn request(&self, session: &Session, method: &str, params: Value) -> WalletResult<Value> {
        debug!("Sending {} on session {}", method, session.topic);
        let request = SessionRequest {
            method: method.to_string(),
            params,
        };
        Ok(self
            .client
            .request(&session.topic, &self.chain_id, request)
            .await?)
    }
}

fn expect_string(value: Value, what: &str) -> WalletResult<String> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        other => Err(WalletError::Pairing(format!(
            "wallet returned an unexpected {}: {}",
            what, other
        ))),
    }
}
