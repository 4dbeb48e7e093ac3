//! Wallet catalog commands

use anyhow::{anyhow, Result};

use crate::{
    pairing::PairingUri,
    wallets::{find_wallet, search, Platform, WalletEntry, WALLETS},
};

/// Run the wallets command
pub fn list(platform: Platform, query: Option<&str>) -> Result<()> {
    // Without a device to probe, nothing counts as installed
    let entries: Vec<WalletEntry> = WALLETS
        .iter()
        .map(|descriptor| WalletEntry {
            descriptor,
            installed: false,
        })
        .collect();

    let matches = search(&entries, query.unwrap_or(""));
    if matches.is_empty() {
        println!("No wallets match.");
        return Ok(());
    }

    for entry in matches {
        let wallet = entry.descriptor;
        println!("{} {:<16} {:<10} {}", wallet.icon, wallet.name, wallet.id, wallet.scheme);
        println!("     {}", wallet.store_url(platform));
    }

    Ok(())
}

/// Run the deep-link command
pub fn deep_link(wallet_id: &str, pairing_uri: &str) -> Result<()> {
    let wallet = find_wallet(wallet_id).ok_or_else(|| anyhow!("Unknown wallet: {}", wallet_id))?;
    PairingUri::parse(pairing_uri)?;

    println!("{}", wallet.deep_link(pairing_uri));
    Ok(())
}
