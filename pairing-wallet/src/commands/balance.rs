//! Balance check command

use anyhow::Result;

use crate::{config::AppConfig, submitter::is_valid_address};

use super::{print_error, print_success, rpc_client};

/// Run the balance command
pub async fn run(config: &AppConfig, address: &str) -> Result<()> {
    if !is_valid_address(address) {
        print_error(&format!("Invalid address: {}", address));
        return Ok(());
    }

    let rpc = rpc_client(config)?;
    println!("Querying {}...", rpc.url());

    let balance = rpc.get_balance(address).await?;

    println!();
    print_success(&format!("Balance: {} ETH", balance.formatted));
    println!("  ({} wei)", balance.wei);

    Ok(())
}
