//! Gas price and nonce queries

use anyhow::Result;

use crate::{config::AppConfig, submitter::is_valid_address, units::format_gwei};

use super::{print_error, rpc_client};

/// Run the gas-price command
pub async fn gas_price(config: &AppConfig) -> Result<()> {
    let rpc = rpc_client(config)?;
    let price = rpc.get_gas_price().await?;
    println!("Gas price: {} gwei", format_gwei(price));
    Ok(())
}

/// Run the nonce command
pub async fn nonce(config: &AppConfig, address: &str) -> Result<()> {
    if !is_valid_address(address) {
        print_error(&format!("Invalid address: {}", address));
        return Ok(());
    }

    let rpc = rpc_client(config)?;
    let count = rpc.get_transaction_count(address).await?;
    println!("Transactions sent from {}: {}", address, count);
    Ok(())
}
