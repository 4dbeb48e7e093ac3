//! Wallet catalog and deep-link hand-off.
//!
//! A fixed list of mobile wallets, a way to check which of them can be
//! opened on this device, and the logic that hands a pairing URI to the
//! chosen wallet: its own deep link if possible, the raw pairing URI if not,
//! and the store page when the wallet is missing.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::{collections::HashSet, fmt, io, str::FromStr};
use tracing::{debug, info, warn};

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Mobile platform, for picking a store link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Ios,
    Android,
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform: {} (expected ios or android)", other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => f.write_str("ios"),
            Platform::Android => f.write_str("android"),
        }
    }
}

/// Static description of a wallet app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    /// URI scheme including `://`.
    pub scheme: &'static str,
    pub icon: &'static str,
    pub ios_app_store: &'static str,
    pub android_play_store: &'static str,
}

impl WalletDescriptor {
    pub fn store_url(&self, platform: Platform) -> &'static str {
        match platform {
            Platform::Ios => self.ios_app_store,
            Platform::Android => self.android_play_store,
        }
    }

    /// Deep link that opens this wallet with a pairing URI.
    pub fn deep_link(&self, pairing_uri: &str) -> String {
        wallet_deep_link(self.scheme, pairing_uri)
    }
}

/// Wallets offered to the user, in display order.
pub const WALLETS: &[WalletDescriptor] = &[
    WalletDescriptor {
        id: "metamask",
        name: "MetaMask",
        scheme: "metamask://",
        icon: "🦊",
        ios_app_store: "https://apps.apple.com/app/metamask/id1438144202",
        android_play_store: "https://play.google.com/store/apps/details?id=io.metamask",
    },
    WalletDescriptor {
        id: "trust",
        name: "Trust Wallet",
        scheme: "trust://",
        icon: "🛡️",
        ios_app_store: "https://apps.apple.com/app/trust-crypto-bitcoin-wallet/id1288339409",
        android_play_store: "https://play.google.com/store/apps/details?id=com.wallet.crypto.trustapp",
    },
    WalletDescriptor {
        id: "rainbow",
        name: "Rainbow",
        scheme: "rainbow://",
        icon: "🌈",
        ios_app_store: "https://apps.apple.com/app/rainbow-ethereum-wallet/id1457119021",
        android_play_store: "https://play.google.com/store/apps/details?id=me.rainbow",
    },
    WalletDescriptor {
        id: "zerion",
        name: "Zerion",
        scheme: "zerion://",
        icon: "⚡",
        ios_app_store: "https://apps.apple.com/app/zerion-wallet-for-web3-defi/id1456732565",
        android_play_store: "https://play.google.com/store/apps/details?id=io.zerion.android",
    },
    WalletDescriptor {
        id: "argent",
        name: "Argent",
        scheme: "argent://",
        icon: "🔷",
        ios_app_store: "https://apps.apple.com/app/argent/id1358741926",
        android_play_store: "https://play.google.com/store/apps/details?id=im.argent.contractwalletclient",
    },
    WalletDescriptor {
        id: "omni",
        name: "Omni",
        scheme: "omni://",
        icon: "🔮",
        ios_app_store: "https://apps.apple.com/app/omni/id1569808693",
        android_play_store: "https://play.google.com/store/apps/details?id=fi.steakwallet.app",
    },
    WalletDescriptor {
        id: "imtoken",
        name: "imToken",
        scheme: "imtoken://",
        icon: "💎",
        ios_app_store: "https://apps.apple.com/app/imtoken2/id1384798940",
        android_play_store: "https://play.google.com/store/apps/details?id=im.token.app",
    },
    WalletDescriptor {
        id: "coinbase",
        name: "Coinbase Wallet",
        scheme: "cbwallet://",
        icon: "🔵",
        ios_app_store: "https://apps.apple.com/app/coinbase-wallet-nfts-crypto/id1278383455",
        android_play_store: "https://play.google.com/store/apps/details?id=org.toshi",
    },
    WalletDescriptor {
        id: "phantom",
        name: "Phantom",
        scheme: "phantom://",
        icon: "👻",
        ios_app_store: "https://apps.apple.com/app/phantom-solana-wallet/id1598432977",
        android_play_store: "https://play.google.com/store/apps/details?id=app.phantom",
    },
    WalletDescriptor {
        id: "ledger",
        name: "Ledger Live",
        scheme: "ledgerlive://",
        icon: "🔐",
        ios_app_store: "https://apps.apple.com/app/ledger-live-crypto-nft-app/id1361671700",
        android_play_store: "https://play.google.com/store/apps/details?id=com.ledger.live",
    },
    WalletDescriptor {
        id: "safepal",
        name: "SafePal",
        scheme: "safepal://",
        icon: "🔒",
        ios_app_store: "https://apps.apple.com/app/safepal-wallet/id1548297139",
        android_play_store: "https://play.google.com/store/apps/details?id=io.safepal.wallet",
    },
    WalletDescriptor {
        id: "exodus",
        name: "Exodus",
        scheme: "exodus://",
        icon: "💫",
        ios_app_store: "https://apps.apple.com/app/exodus-crypto-bitcoin-wallet/id1414384820",
        android_play_store: "https://play.google.com/store/apps/details?id=exodusmovement.exodus",
    },
];

/// Look up a wallet by id.
pub fn find_wallet(id: &str) -> Option<&'static WalletDescriptor> {
    WALLETS.iter().find(|w| w.id.eq_ignore_ascii_case(id))
}

/// Build `<scheme>://wc?uri=<encoded pairing uri>`.
///
/// `scheme` may be given with or without the trailing `://`.
pub fn wallet_deep_link(scheme: &str, pairing_uri: &str) -> String {
    let scheme = scheme.strip_suffix("://").unwrap_or(scheme);
    format!(
        "{}://wc?uri={}",
        scheme,
        utf8_percent_encode(pairing_uri, URI_COMPONENT)
    )
}

/// Opens URLs on the device.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Whether some installed app handles `url`.
    async fn can_open(&self, url: &str) -> io::Result<bool>;

    async fn open(&self, url: &str) -> io::Result<()>;
}

/// Launcher with a fixed set of installed schemes that records what it
/// opened instead of opening it.
#[derive(Debug, Default)]
pub struct StaticLauncher {
    installed: HashSet<String>,
    opened: std::sync::Mutex<Vec<String>>,
}

impl StaticLauncher {
    /// `installed` lists schemes, with or without `://`.
    pub fn new<I, S>(installed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            installed: installed
                .into_iter()
                .map(|s| normalize_scheme(s.as_ref()))
                .collect(),
            opened: Default::default(),
        }
    }

    /// URLs passed to `open`, oldest first.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }
}

fn normalize_scheme(scheme: &str) -> String {
    scheme
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[async_trait]
impl AppLauncher for StaticLauncher {
    async fn can_open(&self, url: &str) -> io::Result<bool> {
        let scheme = normalize_scheme(url);
        // Web links always open in the browser
        Ok(scheme == "https" || scheme == "http" || self.installed.contains(&scheme))
    }

    async fn open(&self, url: &str) -> io::Result<()> {
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "launcher state poisoned"))?;
        opened.push(url.to_string());
        Ok(())
    }
}

/// A catalog entry with its detected install state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletEntry {
    pub descriptor: &'static WalletDescriptor,
    pub installed: bool,
}

/// Check every catalog wallet against the launcher.
///
/// A launcher error counts as "not installed".
pub async fn detect_installed(launcher: &dyn AppLauncher) -> Vec<WalletEntry> {
    let checks = WALLETS.iter().map(|descriptor| async move {
        let installed = match launcher.can_open(descriptor.scheme).await {
            Ok(installed) => installed,
            Err(e) => {
                debug!("Could not check {}: {}", descriptor.name, e);
                false
            }
        };
        WalletEntry {
            descriptor,
            installed,
        }
    });
    futures::future::join_all(checks).await
}

/// Case-insensitive name filter. Installed wallets come first; the catalog
/// order is kept within each group.
pub fn search(entries: &[WalletEntry], query: &str) -> Vec<WalletEntry> {
    let query = query.to_lowercase();
    let matching = entries
        .iter()
        .filter(|e| e.descriptor.name.to_lowercase().contains(&query));
    let (mut installed, missing): (Vec<_>, Vec<_>) = matching.partition(|e| e.installed);
    installed.extend(missing);
    installed
}

/// Where a pairing URI was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandOff {
    /// The wallet's own deep link was opened.
    Wallet { url: String },
    /// The wallet could not take its deep link; the raw pairing URI was
    /// opened instead.
    Fallback { url: String },
    /// The wallet is not installed. The store link is returned for the
    /// caller to offer; nothing was opened.
    Install { store_url: String },
}

/// Hand a pairing URI to the chosen wallet.
pub async fn hand_off(
    launcher: &dyn AppLauncher,
    entry: &WalletEntry,
    pairing_uri: &str,
    platform: Platform,
) -> io::Result<HandOff> {
    let wallet = entry.descriptor;
    if !entry.installed {
        info!("{} is not installed", wallet.name);
        return Ok(HandOff::Install {
            store_url: wallet.store_url(platform).to_string(),
        });
    }

    let url = wallet.deep_link(pairing_uri);
    if launcher.can_open(&url).await.unwrap_or(false) {
        info!("Opening {}", wallet.name);
        launcher.open(&url).await?;
        return Ok(HandOff::Wallet { url });
    }

    warn!("{} cannot open its deep link, falling back to the pairing URI", wallet.name);
    launcher.open(pairing_uri).await?;
    Ok(HandOff::Fallback {
        url: pairing_uri.to_string(),
    })
}
