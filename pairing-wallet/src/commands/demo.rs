//! Demo command
//!
//! Walks the whole session lifecycle against the in-process loopback
//! wallet: initialize, propose, hand the URI to a wallet, wait for approval,
//! optionally send a transfer, then disconnect.

use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::{
    config::AppConfig,
    coordinator::{CoordinatorConfig, SessionCoordinator},
    pairing::{
        loopback::{LoopbackPairingClient, SAMPLE_ADDRESS},
        DisconnectReason,
    },
    session::Metadata,
    submitter::TransactionSubmitter,
    units::{format_ether_display, parse_ether},
    wallets::{detect_installed, find_wallet, hand_off, HandOff, Platform, StaticLauncher},
};

use super::{print_error, print_success, print_warning, prompt_confirm};

/// Project id used when the configuration has none.
const DEMO_PROJECT_ID: &str = "loopback-demo";

/// Options for the demo command
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Seconds before the wallet approves
    pub approve_after: u64,
    /// Reject the proposal instead of approving it
    pub reject: bool,
    /// Wallet to hand the pairing URI to
    pub wallet: String,
    pub platform: Platform,
    /// Transfer recipient
    pub to: Option<String>,
    /// Transfer amount in ETH
    pub amount: Option<String>,
    /// Balance snapshot in ETH to validate the transfer against
    pub balance: String,
    /// Skip confirmation prompt
    pub yes: bool,
}

/// Run the demo command
pub async fn run(config: &AppConfig, options: DemoOptions) -> Result<()> {
    let wallet_descriptor =
        find_wallet(&options.wallet).ok_or_else(|| anyhow!("Unknown wallet: {}", options.wallet))?;
    let balance = parse_ether(&options.balance)
        .map_err(|e| anyhow!("Invalid --balance {}: {}", options.balance, e))?;

    let (client, wallet) = LoopbackPairingClient::new(
        Metadata {
            name: format!("{} (loopback)", wallet_descriptor.name),
            description: "Simulated wallet".to_string(),
            ..Default::default()
        },
        vec![SAMPLE_ADDRESS.to_string()],
    );
    let client = Arc::new(client);

    let mut coordinator_config = CoordinatorConfig::from(config);
    if coordinator_config.project_id.trim().is_empty() {
        print_warning(&format!("No project_id configured, using {}", DEMO_PROJECT_ID));
        coordinator_config.project_id = DEMO_PROJECT_ID.to_string();
    }
    let coordinator = SessionCoordinator::new(client.clone(), coordinator_config);

    let state = coordinator.initialize().await?;
    println!("Pairing client ready ({})", state);

    let proposal = coordinator.connect_default().await?;
    println!();
    println!("Pairing URI:");
    println!("  {}", proposal.uri);

    // Only the chosen wallet is "installed" on this pretend device
    let launcher = StaticLauncher::new([wallet_descriptor.scheme]);
    let entries = detect_installed(&launcher).await;
    if let Some(entry) = entries.iter().find(|e| e.descriptor.id == wallet_descriptor.id) {
        match hand_off(&launcher, entry, &proposal.uri, options.platform).await? {
            HandOff::Wallet { url } => println!("Opened {}: {}", wallet_descriptor.name, url),
            HandOff::Fallback { url } => println!("Opened pairing URI: {}", url),
            HandOff::Install { store_url } => {
                println!("Install {} from {}", wallet_descriptor.name, store_url)
            }
        }
    }

    let responder = if options.reject {
        let wallet = wallet.clone();
        let delay = Duration::from_secs(options.approve_after);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = wallet.reject("User rejected the connection") {
                warn!("Loopback wallet could not reject: {}", e);
            }
        })
    } else {
        let handle = wallet.approve_after(Duration::from_secs(options.approve_after));
        tokio::spawn(async move {
            if let Ok(Err(e)) = handle.await {
                warn!("Loopback wallet could not approve: {}", e);
            }
        })
    };

    println!();
    println!("Waiting for approval in {}...", wallet_descriptor.name);
    let session = match coordinator.await_approval().await {
        Ok(session) => session,
        Err(e) => {
            print_error(&format!("Connection failed: {}", e));
            responder.abort();
            coordinator.shutdown().await;
            return Ok(());
        }
    };

    let address = session
        .primary_address()
        .ok_or_else(|| anyhow!("Wallet granted no accounts"))?;

    println!();
    print_success(&format!("Connected to {}", session.peer.name));
    println!("  Session:  {}", session.topic);
    println!("  Address:  {}", address);
    println!("  Chains:   {}", session.chains().join(", "));
    println!("  Balance snapshot: {} ETH", format_ether_display(balance));

    if let (Some(to), Some(amount)) = (options.to.as_deref(), options.amount.as_deref()) {
        let submitter = TransactionSubmitter::new(client.clone(), config.chain_id.clone())
            .with_gas_limit(config.gas_limit);

        println!();
        println!("Transaction Summary:");
        println!("  To:     {}", to);
        println!("  Amount: {} ETH", amount);
        println!();

        if options.yes || prompt_confirm("Send this transaction?")? {
            match submitter
                .send(Some(session.as_ref()), &address, to, amount, balance)
                .await
            {
                Ok(hash) => print_success(&format!("Transaction sent: {}", hash)),
                Err(e) => print_error(&e.to_string()),
            }
        } else {
            println!("Transaction cancelled.");
        }
    }

    coordinator
        .disconnect(DisconnectReason::user_disconnected())
        .await?;
    println!();
    println!("Disconnected ({})", coordinator.state());

    coordinator.shutdown().await;
    Ok(())
}
