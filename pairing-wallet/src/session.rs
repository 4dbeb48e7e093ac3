//! Session data model.
//!
//! A [`Session`] is what a wallet grants when it approves a pairing proposal:
//! a topic, the namespaces (chains, methods, events, accounts) it agreed to,
//! and the wallet's own metadata. Sessions coming from the pairing client are
//! validated here before the coordinator stores them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// CAIP-2 chain id, e.g. `eip155:1`.
static CHAIN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-a-z0-9]{3,8}:[-_a-zA-Z0-9]{1,32}$").expect("valid regex"));

/// Default chain: Ethereum mainnet.
pub const DEFAULT_CHAIN_ID: &str = "eip155:1";

/// Methods requested from the wallet by default.
pub const DEFAULT_METHODS: &[&str] = &["eth_sendTransaction", "personal_sign"];

/// Events requested from the wallet by default.
pub const DEFAULT_EVENTS: &[&str] = &["chainChanged", "accountsChanged"];

/// Descriptive metadata for either side of a session.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// What the application asks for within one namespace.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct NamespaceRequirement {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Required namespaces keyed by namespace name (`eip155`).
pub type RequiredNamespaces = BTreeMap<String, NamespaceRequirement>;

/// The `eip155` mainnet requirement used when nothing else is configured.
pub fn default_required_namespaces() -> RequiredNamespaces {
    let mut namespaces = RequiredNamespaces::new();
    namespaces.insert(
        "eip155".to_string(),
        NamespaceRequirement {
            chains: vec![DEFAULT_CHAIN_ID.to_string()],
            methods: DEFAULT_METHODS.iter().map(|s| s.to_string()).collect(),
            events: DEFAULT_EVENTS.iter().map(|s| s.to_string()).collect(),
        },
    );
    namespaces
}

/// What the wallet granted within one namespace.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct Namespace {
    /// CAIP-10 account ids.
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// A CAIP-10 account id (`eip155:1:0xab16...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Account {
    pub namespace: String,
    pub reference: String,
    pub address: String,
}

impl Account {
    /// CAIP-2 chain id of this account.
    pub fn chain_id(&self) -> String {
        format!("{}:{}", self.namespace, self.reference)
    }
}

impl FromStr for Account {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(reference), Some(address))
                if is_valid_chain_id(&format!("{}:{}", namespace, reference))
                    && !address.is_empty() =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    reference: reference.to_string(),
                    address: address.to_string(),
                })
            }
            _ => Err(format!("invalid CAIP-10 account: {}", s)),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.reference, self.address)
    }
}

/// Whether `chain_id` is a well-formed CAIP-2 id.
pub fn is_valid_chain_id(chain_id: &str) -> bool {
    CHAIN_ID_RE.is_match(chain_id)
}

/// An approved connection between this application and a wallet.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub namespaces: BTreeMap<String, Namespace>,
    #[serde(default)]
    pub peer: Metadata,
    /// Unix timestamp (seconds) after which the wallet considers the session
    /// gone.
    #[serde(default)]
    pub expiry: Option<i64>,
}

impl Session {
    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("session topic is empty".to_string());
        }
        if self.namespaces.is_empty() {
            return Err("session grants no namespaces".to_string());
        }
        for (name, namespace) in &self.namespaces {
            for account in &namespace.accounts {
                let parsed: Account = account.parse()?;
                if &parsed.namespace != name {
                    return Err(format!(
                        "account {} listed under namespace {}",
                        account, name
                    ));
                }
            }
            for chain in &namespace.chains {
                if !is_valid_chain_id(chain) {
                    return Err(format!("invalid chain id: {}", chain));
                }
            }
        }
        Ok(())
    }

    /// All accounts across namespaces, in namespace order.
    pub fn accounts(&self) -> Vec<Account> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.accounts.iter())
            .filter_map(|a| a.parse().ok())
            .collect()
    }

    /// Address of the first account, which the application treats as the
    /// connected address.
    pub fn primary_address(&self) -> Option<String> {
        self.accounts().into_iter().next().map(|a| a.address)
    }

    /// First account address on a given chain.
    pub fn address_on_chain(&self, chain_id: &str) -> Option<String> {
        self.accounts()
            .into_iter()
            .find(|a| a.chain_id() == chain_id)
            .map(|a| a.address)
    }

    /// Chains granted in every namespace, including those only implied by
    /// accounts.
    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = Vec::new();
        for namespace in self.namespaces.values() {
            for chain in &namespace.chains {
                if !chains.contains(chain) {
                    chains.push(chain.clone());
                }
            }
        }
        for account in self.accounts() {
            let chain = account.chain_id();
            if !chains.contains(&chain) {
                chains.push(chain);
            }
        }
        chains
    }

    /// Namespace that would carry requests for `chain_id`.
    pub fn namespace_for_chain(&self, chain_id: &str) -> Option<&Namespace> {
        let (name, _) = chain_id.split_once(':')?;
        self.namespaces.get(name)
    }

    /// Whether `method` may be requested on `chain_id`.
    pub fn allows(&self, chain_id: &str, method: &str) -> bool {
        self.namespace_for_chain(chain_id)
            .map(|ns| ns.methods.iter().any(|m| m == method))
            .unwrap_or(false)
            && self.chains().iter().any(|c| c == chain_id)
    }

    /// Apply a `session_update`: namespaces present in `update` replace the
    /// stored ones, the rest are kept.
    pub fn merge_namespaces(&mut self, update: BTreeMap<String, Namespace>) {
        for (name, namespace) in update {
            self.namespaces.insert(name, namespace);
        }
    }
}
