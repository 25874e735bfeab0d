//! Engine configuration.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables of the session engine.
///
/// Resolved from, in increasing priority: the defaults, `wallet-session.toml` in the working
/// directory, and `WALLET_SESSION_*` environment variables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether `eth_getBlockByNumber` returns full transaction objects.
    pub full_transactions: bool,
    /// Re-query the balance of the active account when it changes.
    pub refresh_balance_on_account_change: bool,
    /// Decimals shown when formatting balances.
    pub balance_precision: usize,
    /// Topic of the block header subscription.
    pub new_heads_topic: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            full_transactions: true,
            refresh_balance_on_account_change: true,
            balance_precision: 4,
            new_heads_topic: Self::NEW_HEADS.to_string(),
        }
    }
}

impl SessionConfig {
    /// File name of the TOML config.
    pub const FILE_NAME: &'static str = "wallet-session.toml";

    /// Prefix of environment variable overrides.
    pub const ENV_PREFIX: &'static str = "WALLET_SESSION_";

    pub const NEW_HEADS: &'static str = "newHeads";

    /// Loads the config from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment().extract()?)
    }

    /// Loads the config, reading the TOML file from `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment_with_file(path).extract()?)
    }

    /// The figment used by [`load`](Self::load).
    pub fn figment() -> Figment {
        Self::figment_with_file(Self::FILE_NAME)
    }

    /// Defaults, then the TOML file at `path`, then the environment.
    pub fn figment_with_file(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(Self::ENV_PREFIX))
    }
}
