//! Display helpers and the catalogue of chains the wallet can be switched to.

use alloy_chains::NamedChain;
use alloy_primitives::{U256, utils::format_ether};
use serde::{Deserialize, Serialize};

/// Formats a wei amount as ether with `precision` decimals.
pub fn format_balance(wei: U256, precision: usize) -> String {
    let ether = format_ether(wei);
    match ether.parse::<f64>() {
        Ok(value) => format!("{value:.precision$}"),
        Err(_) => ether,
    }
}

/// Shortens an address to `0x123...ab`.
pub fn format_address(address: &str) -> String {
    match (address.get(..5), address.get(39..)) {
        (Some(head), Some(tail)) => format!("{head}...{tail}"),
        _ => address.to_string(),
    }
}

/// Parses a hex (`0x` prefixed) or decimal chain id.
pub fn chain_id_to_u64(chain_id: &str) -> Option<u64> {
    match chain_id.strip_prefix("0x").or_else(|| chain_id.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => chain_id.parse().ok(),
    }
}

/// Whether `chain_id` is one of the [`SupportedChain`]s.
pub fn is_supported_chain(chain_id: u64) -> bool {
    SupportedChain::from_id(chain_id).is_some()
}

/// Chains the wallet can be asked to switch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedChain {
    Mainnet,
    Sepolia,
}

impl SupportedChain {
    pub const ALL: [Self; 2] = [Self::Mainnet, Self::Sepolia];

    pub fn from_id(chain_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|chain| chain.id() == chain_id)
    }

    pub const fn named(&self) -> NamedChain {
        match self {
            Self::Mainnet => NamedChain::Mainnet,
            Self::Sepolia => NamedChain::Sepolia,
        }
    }

    pub const fn id(&self) -> u64 {
        self.named() as u64
    }

    /// The chain id as the provider reports it.
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.id())
    }

    /// Parameters for `wallet_addEthereumChain`.
    pub fn network_info(&self) -> NetworkInfo {
        let (name, rpc, explorer) = match self {
            Self::Mainnet => {
                ("Ethereum Mainnet", "https://eth.merkle.io", "https://etherscan.io")
            }
            Self::Sepolia => (
                "Sepolia test network",
                "https://sepolia.infura.io/v3/",
                "https://sepolia.etherscan.io",
            ),
        };
        NetworkInfo {
            chain_id: self.hex_id(),
            chain_name: name.to_string(),
            rpc_urls: vec![rpc.to_string()],
            block_explorer_urls: vec![explorer.to_string()],
            native_currency: NativeCurrency::ether(),
        }
    }
}

/// EIP-3085 chain description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn ether() -> Self {
        Self { name: "ETH".to_string(), symbol: "ETH".to_string(), decimals: 18 }
    }
}
