//! Error taxonomy shared by every dispatch stage.
//!
//! Stages never swallow each other's errors: the cache propagates whatever its
//! delegate returned (and simply skips memoization), the peer router surfaces
//! transport failures verbatim, and the evaluator reports a missing rewrite rule
//! as [`DispatchError::UnresolvedRelation`] instead of answering `allowed=false`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse category of a [`DispatchError`].
///
/// The category is what travels over the wire between peers and what the
/// inbound service maps onto status codes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnresolvedRelation,
    MaxDepthExceeded,
    UpstreamUnavailable,
    Cancelled,
    Internal,
}

/// Errors that can occur while dispatching a check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Malformed object, relation or subject.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No rewrite rule is defined for `type#relation`.
    #[error("No rewrite rule matches {0}")]
    UnresolvedRelation(String),

    /// The rewrite chain was deeper than the configured budget.
    #[error("Max dispatch depth exceeded at {0}")]
    MaxDepthExceeded(String),

    /// A peer or the tuple store could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The caller cancelled the check or its deadline passed.
    #[error("Check cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation, e.g. an empty ring.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DispatchError::Internal(message.into())
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        DispatchError::InvalidRequest(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::UnresolvedRelation(_) => ErrorKind::UnresolvedRelation,
            DispatchError::MaxDepthExceeded(_) => ErrorKind::MaxDepthExceeded,
            DispatchError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            DispatchError::Cancelled(_) => ErrorKind::Cancelled,
            DispatchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The payload carried by the variant, without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            DispatchError::InvalidRequest(d)
            | DispatchError::UnresolvedRelation(d)
            | DispatchError::MaxDepthExceeded(d)
            | DispatchError::UpstreamUnavailable(d)
            | DispatchError::Cancelled(d)
            | DispatchError::Internal(d) => d,
        }
    }

    /// Rebuilds an error received from a peer.
    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::InvalidRequest => DispatchError::InvalidRequest(detail),
            ErrorKind::UnresolvedRelation => DispatchError::UnresolvedRelation(detail),
            ErrorKind::MaxDepthExceeded => DispatchError::MaxDepthExceeded(detail),
            ErrorKind::UpstreamUnavailable => DispatchError::UpstreamUnavailable(detail),
            ErrorKind::Cancelled => DispatchError::Cancelled(detail),
            ErrorKind::Internal => DispatchError::Internal(detail),
        }
    }
}
