//! Session data model.

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of the [`Session`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// The canonical record of the current connection.
///
/// Only the [`SessionReconciler`](crate::SessionReconciler) mutates it; everybody else sees
/// snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub status: ConnectionStatus,
    /// Authorized accounts, the first one is the active account. Non-empty iff connected.
    pub accounts: Vec<String>,
    /// Hex encoded chain id as reported by the provider.
    pub chain_id: Option<String>,
    pub latest_block: Option<BlockSummary>,
    /// Present only while connected.
    pub subscription_id: Option<SubscriptionId>,
    /// Set when the provider switched chains under a live session.
    pub chain_switch: Option<ChainSwitch>,
}

impl Session {
    /// The account at index 0, if any.
    pub fn active_account(&self) -> Option<&str> {
        self.accounts.first().map(String::as_str)
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_disconnected(&self) -> bool {
        self.status == ConnectionStatus::Disconnected
    }
}

/// The part of a block (or `newHeads` header) the session keeps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    /// `None` for pending blocks.
    #[serde(default)]
    pub hash: Option<B256>,
    #[serde(default)]
    pub parent_hash: Option<B256>,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
}

/// Unique subscription id
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    /// numerical sub id
    Number(u64),
    /// string sub id, a hash for example
    String(String),
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<u64> for SubscriptionId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(num) => num.fmt(f),
            Self::String(s) => s.fmt(f),
        }
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A chain switch observed while connected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSwitch {
    pub from: String,
    pub to: String,
}

/// Identifies one connection attempt; responses tagged with an older attempt are stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub(crate) u64);

impl AttemptId {
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a read-only address lookup.
///
/// Each field is `None` when its query failed, never a value from an earlier lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub address: String,
    /// Balance in wei.
    pub balance: Option<U256>,
    /// Value of `net_version`.
    pub network: Option<String>,
}

impl LookupResult {
    /// Balance in ether with `precision` decimals, if known.
    pub fn formatted_balance(&self, precision: usize) -> Option<String> {
        self.balance.map(|balance| crate::fmt::format_balance(balance, precision))
    }
}
