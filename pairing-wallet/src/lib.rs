//! Pairing Wallet
//!
//! A wallet client that holds no keys. It pairs with a remote wallet app
//! over a pairing protocol, reads balances from a chain JSON-RPC node, and
//! asks the paired wallet to sign and broadcast transfers.
//!
//! ## Components
//!
//! - [`SessionCoordinator`]: pairing proposals, approval waiting and
//!   session teardown
//! - [`ChainRpcClient`]: read-only node queries
//! - [`TransactionSubmitter`]: validated transfers and message signing
//!   through the session
//! - [`wallets`]: wallet catalog and deep-link hand-off

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pairing;
pub mod rpc;
pub mod session;
pub mod submitter;
pub mod units;
pub mod wallets;

pub mod commands;

pub use config::AppConfig;
pub use coordinator::{CoordinatorConfig, CoordinatorSnapshot, CoordinatorState, PairingProposal, SessionCoordinator};
pub use error::{WalletError, WalletResult};
pub use pairing::{loopback::LoopbackPairingClient, PairingClient};
pub use rpc::{Balance, ChainRpcClient};
pub use session::Session;
pub use submitter::TransactionSubmitter;
