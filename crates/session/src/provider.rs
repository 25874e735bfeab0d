//! The boundary to an injected EIP-1193 provider.
//!
//! [`ProviderGateway`] is the only type in this crate that talks to the outside world. It is a
//! pass-through: request/response calls, push event registration, and subscription helpers built
//! on the fixed `eth_subscribe`/`eth_unsubscribe` methods.

use crate::{error::ProviderError, session::SubscriptionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Method names of the provider calls the engine issues.
pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const GET_BALANCE: &str = "eth_getBalance";
    pub const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
    pub const NET_VERSION: &str = "net_version";
    pub const SUBSCRIBE: &str = "eth_subscribe";
    pub const UNSUBSCRIBE: &str = "eth_unsubscribe";
    pub const SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const ADD_CHAIN: &str = "wallet_addEthereumChain";
}

/// The push events a provider emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
    Message,
}

impl EventKind {
    /// All events the engine listens to.
    pub const ALL: [Self; 4] =
        [Self::AccountsChanged, Self::ChainChanged, Self::Disconnect, Self::Message];

    /// The event name used by the provider.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
            Self::Disconnect => "disconnect",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A push event delivered by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Disconnect { code: i64, reason: String },
    Message(ProviderMessage),
}

impl ProviderEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AccountsChanged(_) => EventKind::AccountsChanged,
            Self::ChainChanged(_) => EventKind::ChainChanged,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// Payload of the `message` event: `{type, data: {subscription, result}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: SubscriptionMessage,
}

impl ProviderMessage {
    /// The `type` of messages carrying subscription results.
    pub const ETH_SUBSCRIPTION: &'static str = "eth_subscription";

    /// Creates an `eth_subscription` message.
    pub fn subscription(subscription: SubscriptionId, result: Value) -> Self {
        Self {
            kind: Self::ETH_SUBSCRIPTION.to_string(),
            data: SubscriptionMessage { subscription, result },
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.kind == Self::ETH_SUBSCRIPTION
    }
}

/// Represents the `data` field of an `eth_subscription` message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    pub subscription: SubscriptionId,
    #[serde(default)]
    pub result: Value,
}

/// Callback invoked for every push event of the kind it was registered for.
pub type EventHandler = Arc<dyn Fn(ProviderEvent) + Send + Sync>;

/// Removes a registered [`EventHandler`] when invoked.
#[must_use = "dropping an `Unregister` leaves the handler registered"]
pub struct Unregister(Box<dyn FnOnce() + Send + Sync>);

impl Unregister {
    pub fn new(f: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn unregister(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unregister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unregister").finish_non_exhaustive()
    }
}

/// Capability wrapper around an injected provider.
#[async_trait]
pub trait ProviderGateway: Send + Sync + 'static {
    /// Whether a provider is injected at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Issues a request and returns the raw JSON result.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Registers `handler` for `event`.
    fn on_event(&self, event: EventKind, handler: EventHandler) -> Unregister;

    /// Opens a push subscription for `topic`.
    async fn subscribe(&self, topic: &str) -> Result<SubscriptionId, ProviderError> {
        let id = self.call(methods::SUBSCRIBE, serde_json::json!([topic])).await?;
        serde_json::from_value(id).map_err(ProviderError::invalid_response)
    }

    /// Closes a push subscription.
    ///
    /// Best-effort: failures are logged and swallowed.
    async fn unsubscribe(&self, id: &SubscriptionId) {
        if let Err(err) = self.call(methods::UNSUBSCRIBE, serde_json::json!([id])).await {
            warn!(target: "session::provider", %id, %err, "failed to unsubscribe");
        }
    }
}

/// Issues a call and decodes its result.
pub(crate) async fn request<P, T>(
    provider: &P,
    method: &str,
    params: Value,
) -> Result<T, ProviderError>
where
    P: ProviderGateway + ?Sized,
    T: DeserializeOwned,
{
    trace!(target: "session::provider", method, %params, "request");
    let value = provider.call(method, params).await?;
    serde_json::from_value(value).map_err(ProviderError::invalid_response)
}
