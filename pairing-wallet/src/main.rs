//! Pairing Wallet CLI
//!
//! Query the chain and pair with a remote wallet from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pairing_wallet::{
    commands::{self, demo::DemoOptions},
    config::AppConfig,
    wallets::Platform,
};

#[derive(Parser)]
#[command(name = "pairing-wallet")]
#[command(about = "Pair with a remote wallet, read balances and send transfers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (defaults to ~/.pairing-wallet/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the chain RPC endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ETH balance of an address
    Balance {
        /// Address to query
        address: String,
    },

    /// Show the current gas price
    GasPrice,

    /// Show the transaction count of an address
    Nonce {
        /// Address to query
        address: String,
    },

    /// List supported wallets
    Wallets {
        /// Platform whose store links to show (ios or android)
        #[arg(long, default_value = "ios")]
        platform: Platform,

        /// Filter by name
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Build the deep link that opens a wallet with a pairing URI
    DeepLink {
        /// Wallet id (see `wallets`)
        wallet: String,

        /// Pairing URI (wc:...)
        uri: String,
    },

    /// Run a full pairing session against a simulated wallet
    Demo {
        /// Seconds before the wallet answers
        #[arg(long, default_value = "2")]
        approve_after: u64,

        /// Have the wallet reject the proposal
        #[arg(long)]
        reject: bool,

        /// Wallet to hand the pairing URI to
        #[arg(long, default_value = "metamask")]
        wallet: String,

        /// Platform whose store link to use if the wallet is missing
        #[arg(long, default_value = "ios")]
        platform: Platform,

        /// Send a transfer to this address once connected
        #[arg(long, requires = "amount")]
        to: Option<String>,

        /// Amount to send in ETH
        #[arg(long, requires = "to")]
        amount: Option<String>,

        /// Balance snapshot in ETH the transfer is checked against
        #[arg(long, default_value = "1.0")]
        balance: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Check the configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }

    match cli.command {
        Commands::Balance { address } => commands::balance::run(&config, &address).await,
        Commands::GasPrice => commands::network::gas_price(&config).await,
        Commands::Nonce { address } => commands::network::nonce(&config, &address).await,
        Commands::Wallets { platform, search } => {
            commands::wallets::list(platform, search.as_deref())
        }
        Commands::DeepLink { wallet, uri } => commands::wallets::deep_link(&wallet, &uri),
        Commands::Demo {
            approve_after,
            reject,
            wallet,
            platform,
            to,
            amount,
            balance,
            yes,
        } => {
            let options = DemoOptions {
                approve_after,
                reject,
                wallet,
                platform,
                to,
                amount,
                balance,
                yes,
            };
            commands::demo::run(&config, options).await
        }
        Commands::ValidateConfig => commands::validate_config(&config),
    }
}
