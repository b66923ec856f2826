// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use thiserror::Error;

/// Errors raised while building node sets or talking to the hypervisor.
///
/// Most variants describe an operational condition the user can act on (bad settings, nothing
/// tagged, a remote call that failed). `Unexpected` is reserved for failures that do not fit the
/// taxonomy; it maps to a different exit status so that it can be told apart from the rest.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid static settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No nodes could be found by any method.
    #[error("node discovery failed: {0}")]
    NodeDiscovery(String),

    /// A single remote call failed. `detail` holds the transport-level text, if any.
    #[error("{message}")]
    Provider {
        message: String,
        detail: Option<String>,
    },

    /// A request was rejected locally, before any remote call was made.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("cannot provision cluster: {0}")]
    Provision(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn provider(message: impl Into<String>) -> Self {
        Error::Provider {
            message: message.into(),
            detail: None,
        }
    }

    pub fn provider_with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Error::Provider {
            message: message.into(),
            detail: if detail.is_empty() { None } else { Some(detail) },
        }
    }

    /// Replace the message of a provider error, keeping its transport detail. Other errors are
    /// returned unchanged.
    pub fn context(self, message: impl Into<String>) -> Self {
        match self {
            Error::Provider { detail, .. } => Error::Provider {
                message: message.into(),
                detail,
            },
            other => other,
        }
    }

    /// The transport-level detail text carried by provider errors.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::Provider { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Process exit status for this error: 1 for recognized application errors, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Unexpected(_) => 2,
            _ => 1,
        }
    }
}

/// A `HandledError` represents an error that has already been handled. When you call a function
/// that returns a `HandledResult`, you don't need to do anything with that error other than be
/// aware that it happened.
///
/// The batch loops use this to report a per-node failure at the point where it happens and then
/// move on to the next node.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it the error.
    ///
    /// Then, return a `HandledResult`, so that transitive callers of this function know that they
    /// do not need to do anything further to handle the error.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Error::Configuration("x".into()).exit_code(), 1);
        assert_eq!(Error::NodeDiscovery("x".into()).exit_code(), 1);
        assert_eq!(Error::provider("x").exit_code(), 1);
        assert_eq!(Error::Unexpected("x".into()).exit_code(), 2);
    }

    #[test]
    fn empty_detail_is_dropped() {
        assert_eq!(Error::provider_with_detail("call failed", "").detail(), None);
        assert_eq!(
            Error::provider_with_detail("call failed", "501 not implemented").detail(),
            Some("501 not implemented")
        );
    }

    #[test]
    fn handle_err_runs_handler_once() {
        let mut seen = Vec::new();
        let res: std::result::Result<u32, &str> = Err("boom");
        let handled = res.handle_err(|e| seen.push(e.to_string()));
        assert_eq!(handled, Err(HandledError {}));
        assert_eq!(seen, vec!["boom".to_string()]);
    }
}
