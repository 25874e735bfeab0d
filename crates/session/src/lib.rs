//! # wallet-session
//!
//! Connection and session state engine for an injected EIP-1193 wallet provider.
//!
//! [`ConnectionController`] connects to a [`ProviderGateway`], keeps a single [`Session`] in sync
//! with the provider's push events and a `newHeads` subscription, and answers read-only balance
//! lookups. Every session change is decided by the pure [`SessionReconciler`], which discards
//! results and events that belong to a superseded connection attempt or chain.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::SessionConfig;

mod controller;
pub use controller::{ConnectionController, EventListeners, Observer, ObserverHandle};

pub mod error;
pub use error::{
    ConfigError, ProviderError, ProviderErrorCode, SessionError, StaleEvent, StaleReason,
};

pub mod fmt;

pub mod provider;
pub use provider::{
    EventHandler, EventKind, ProviderEvent, ProviderGateway, ProviderMessage, SubscriptionMessage,
    Unregister,
};

mod reconciler;
pub use reconciler::{Effect, SessionInput, SessionReconciler, Transition};

mod session;
pub use session::{
    AttemptId, BlockSummary, ChainSwitch, ConnectionStatus, LookupResult, Session,
    SubscriptionId,
};

mod subscription;
pub use subscription::SubscriptionManager;
