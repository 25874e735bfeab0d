//! Error taxonomy of the session engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt};

/// Errors surfaced to callers of the [`ConnectionController`](crate::ConnectionController).
///
/// Only connecting can fail in a way the caller sees; every other provider failure is logged
/// and turned into an absent value.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No injected provider was present when `connect` was called.
    #[error("Ethereum provider not found. Please install a wallet provider.")]
    ProviderUnavailable,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A failed provider call, subscribe or unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    /// error message
    pub message: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderError {
    /// New [`ProviderError`] with the given [`ProviderErrorCode`].
    pub const fn new(code: ProviderErrorCode) -> Self {
        Self { message: Cow::Borrowed(code.message()), code, data: None }
    }

    /// Creates an error with the given code and a custom message.
    pub fn with_message<M>(code: ProviderErrorCode, message: M) -> Self
    where
        M: Into<String>,
    {
        Self { code, message: message.into().into(), data: None }
    }

    /// The user rejected the request.
    pub const fn user_rejected() -> Self {
        Self::new(ProviderErrorCode::UserRejectedRequest)
    }

    /// The provider is not connected to any chain.
    pub const fn disconnected() -> Self {
        Self::new(ProviderErrorCode::Disconnected)
    }

    /// The provider does not know the requested chain.
    pub const fn unrecognized_chain() -> Self {
        Self::new(ProviderErrorCode::UnrecognizedChain)
    }

    /// Creates an `InternalError` error with a message.
    pub fn internal_error_with<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ProviderErrorCode::InternalError, message)
    }

    /// The provider answered, but with a payload of the wrong shape.
    pub fn invalid_response(err: serde_json::Error) -> Self {
        Self::with_message(ProviderErrorCode::InvalidResponse, err.to_string())
    }

    /// Attaches the `data` member of the error.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)?;
        if let Some(data) = &self.data {
            write!(f, ". Data: {data}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

/// Provider error codes, from EIP-1193 and JSON-RPC 2.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// The user rejected the request.
    UserRejectedRequest,
    /// The requested method and/or account has not been authorized by the user.
    Unauthorized,
    /// The provider does not support the requested method.
    UnsupportedMethod,
    /// The provider is disconnected from all chains.
    Disconnected,
    /// The provider is not connected to the requested chain.
    ChainDisconnected,
    /// `wallet_switchEthereumChain` target is unknown to the provider, see EIP-3326.
    UnrecognizedChain,
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid request object.
    InvalidRequest,
    /// method does not exist or valid
    MethodNotFound,
    /// invalid method parameter.
    InvalidParams,
    /// internal call error
    InternalError,
    /// The response could not be decoded into the expected type.
    InvalidResponse,
    /// Any other code.
    Other(i64),
}

impl ProviderErrorCode {
    /// Returns the error code as `i64`
    pub const fn code(&self) -> i64 {
        match *self {
            Self::UserRejectedRequest => 4001,
            Self::Unauthorized => 4100,
            Self::UnsupportedMethod => 4200,
            Self::Disconnected => 4900,
            Self::ChainDisconnected => 4901,
            Self::UnrecognizedChain => 4902,
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::InvalidResponse => -32000,
            Self::Other(c) => c,
        }
    }

    /// Returns the message associated with the error
    pub const fn message(&self) -> &'static str {
        match *self {
            Self::UserRejectedRequest => "User rejected the request",
            Self::Unauthorized => "Unauthorized",
            Self::UnsupportedMethod => "Unsupported method",
            Self::Disconnected => "Disconnected",
            Self::ChainDisconnected => "Chain disconnected",
            Self::UnrecognizedChain => "Unrecognized chain",
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::InvalidResponse => "Invalid response",
            Self::Other(_) => "Provider error",
        }
    }
}

impl From<i64> for ProviderErrorCode {
    fn from(code: i64) -> Self {
        match code {
            4001 => Self::UserRejectedRequest,
            4100 => Self::Unauthorized,
            4200 => Self::UnsupportedMethod,
            4900 => Self::Disconnected,
            4901 => Self::ChainDisconnected,
            4902 => Self::UnrecognizedChain,
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::InvalidResponse,
            _ => Self::Other(code),
        }
    }
}

impl Serialize for ProviderErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'a> Deserialize<'a> for ProviderErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        i64::deserialize(deserializer).map(Into::into)
    }
}

/// An inbound event that no longer applies to the current session.
///
/// Never surfaced to consumers: the controller logs and drops it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("stale event discarded: {reason}")]
pub struct StaleEvent {
    pub reason: StaleReason,
}

impl StaleEvent {
    pub const fn new(reason: StaleReason) -> Self {
        Self { reason }
    }
}

impl From<StaleReason> for StaleEvent {
    fn from(reason: StaleReason) -> Self {
        Self::new(reason)
    }
}

/// Why an event was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleReason {
    /// The event belongs to a superseded connection attempt.
    StaleAttempt,
    /// The session is not connected.
    NotConnected,
    /// The push message carries an identity other than the live subscription.
    ForeignSubscription,
    /// A chain switch happened after the request was issued.
    SupersededChain,
    /// The event has no meaning in the current state.
    Unexpected,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StaleAttempt => "superseded connection attempt",
            Self::NotConnected => "session not connected",
            Self::ForeignSubscription => "foreign subscription",
            Self::SupersededChain => "superseded chain",
            Self::Unexpected => "unexpected in current state",
        };
        f.write_str(s)
    }
}

/// Failure to extract a [`SessionConfig`](crate::SessionConfig).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("failed to extract session config: {0}")]
pub struct ConfigError(#[from] pub figment::Error);
