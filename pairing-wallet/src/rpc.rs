//! Chain RPC Client
//!
//! Read-only JSON-RPC 2.0 calls against an Ethereum-compatible node:
//! - Native balance of an address
//! - Gas price, transaction count and chain id
//!
//! There is no retry or failover; every failure surfaces as `RpcError`.

use primitive_types::U256;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    error::{WalletError, WalletResult},
    units::{format_ether_display, from_hex_quantity},
};

/// Public endpoint used when nothing else is configured
pub const DEFAULT_RPC_URL: &str = "https://cloudflare-eth.com";

/// Timeout for RPC requests
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Shown in place of a balance that could not be fetched
pub const FALLBACK_BALANCE: &str = "0.0000";

/// JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    #[serde(default)]
    id: Value,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// Native balance of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    /// Exact amount in wei
    pub wei: U256,
    /// Ether rounded to four decimals
    pub formatted: String,
}

impl Balance {
    pub fn from_wei(wei: U256) -> Self {
        Self {
            wei,
            formatted: format_ether_display(wei),
        }
    }
}

/// HTTP JSON-RPC client for a single node
#[derive(Debug, Clone)]
pub struct ChainRpcClient {
    client: reqwest::Client,
    url: String,
}

impl ChainRpcClient {
    /// Create a client with the default timeout
    pub fn new(url: impl Into<String>) -> WalletResult<Self> {
        Self::with_timeout(url, RPC_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::RpcError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a raw JSON-RPC call
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> WalletResult<T> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        };

        let start = Instant::now();

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(WalletError::RpcError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let json_response: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| WalletError::RpcError(format!("invalid response to {}: {}", method, e)))?;

        debug!("{} answered in {}ms", method, start.elapsed().as_millis());

        if let Some(error) = json_response.error {
            return Err(WalletError::RpcError(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        json_response
            .result
            .ok_or_else(|| WalletError::RpcError(format!("missing result in {} response", method)))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> WalletResult<U256> {
        let quantity: String = self.call(method, params).await?;
        from_hex_quantity(&quantity)
            .map_err(|e| WalletError::RpcError(format!("malformed {} result {:?}: {}", method, quantity, e)))
    }

    /// Balance in wei at the latest block
    pub async fn get_balance_wei(&self, address: &str) -> WalletResult<U256> {
        self.call_quantity("eth_getBalance", json!([address, "latest"]))
            .await
    }

    /// Balance at the latest block, with a display string
    pub async fn get_balance(&self, address: &str) -> WalletResult<Balance> {
        self.get_balance_wei(address).await.map(Balance::from_wei)
    }

    /// Current gas price in wei
    pub async fn get_gas_price(&self) -> WalletResult<U256> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    /// Number of transactions mined from `address`
    pub async fn get_transaction_count(&self, address: &str) -> WalletResult<u64> {
        let count = self
            .call_quantity("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        if count > U256::from(u64::MAX) {
            return Err(WalletError::RpcError(format!("nonce out of range: {}", count)));
        }
        Ok(count.as_u64())
    }

    /// Numeric chain id of the node (`1` for mainnet)
    pub async fn chain_id(&self) -> WalletResult<u64> {
        let id = self.call_quantity("eth_chainId", json!([])).await?;
        if id > U256::from(u64::MAX) {
            return Err(WalletError::RpcError(format!("chain id out of range: {}", id)));
        }
        Ok(id.as_u64())
    }

    /// Display balance, or `"0.0000"` if it could not be fetched
    pub async fn balance_or_fallback(&self, address: &str) -> String {
        match self.get_balance(address).await {
            Ok(balance) => balance.formatted,
            Err(e) => {
                warn!("Failed to fetch balance for {}: {}", address, e);
                FALLBACK_BALANCE.to_string()
            }
        }
    }
}
