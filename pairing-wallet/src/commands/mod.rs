//! CLI Commands
//!
//! Implementation of all wallet CLI commands.

pub mod balance;
pub mod demo;
pub mod network;
pub mod wallets;

use anyhow::Result;
use std::io::{self, Write};
use std::time::Duration;

use crate::{config::AppConfig, rpc::ChainRpcClient};

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// RPC client for the configured node
pub fn rpc_client(config: &AppConfig) -> Result<ChainRpcClient> {
    Ok(ChainRpcClient::with_timeout(
        config.rpc_url.clone(),
        Duration::from_secs(config.rpc_timeout_secs),
    )?)
}

/// Run the validate-config command
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            print_success("Configuration is valid");
            println!("  RPC endpoint:     {}", config.rpc_url);
            println!("  Chain:            {}", config.chain_id);
            println!("  Approval timeout: {}s", config.approval_timeout_secs);
            println!("  Gas limit:        {}", config.gas_limit);
            Ok(())
        }
        Err(e) => {
            print_error(&e.to_string());
            Err(e)
        }
    }
}
