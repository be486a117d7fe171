//! # Error Handling Module
//!
//! This module defines every error the balancer can surface, using the
//! `thiserror` crate. Errors fall into three categories:
//!
//! - **Configuration errors** (`DuplicateServer`, `UnknownServer`,
//!   `Configuration`): the caller misused the registry API.
//! - **Protocol errors** (`CounterUnderflow`): the caller violated the
//!   acquire/release discipline, e.g. released the same token twice.
//! - **Capacity errors** (`NoServersAvailable`, `ServerBusy`): transient or
//!   structural state the caller can recover from by retrying or rejecting
//!   the request upstream.
//!
//! No error is fatal to the engine: after any `Err`, the registry and all
//! connection counters remain consistent and subsequent calls behave
//! normally.

use thiserror::Error;

/// Main result type used throughout the balancer
pub type BalancerResult<T> = Result<T, BalancerError>;

/// All error conditions the balancer can report
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display`
/// with the given message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalancerError {
    /// A server with this id is already registered
    #[error("duplicate server: {id}")]
    DuplicateServer { id: String },

    /// No server with this id is registered (or the reference is stale:
    /// the server was removed, possibly re-added under a new generation)
    #[error("unknown server: {id}")]
    UnknownServer { id: String },

    /// The server still has in-flight connections and cannot be removed
    #[error("server busy: {id} has {active} active connection(s)")]
    ServerBusy { id: String, active: u64 },

    /// The pool is empty; there is no route available right now
    #[error("no servers available")]
    NoServersAvailable,

    /// A release would have driven a connection counter below zero,
    /// which indicates a caller bug (release without a matching acquire)
    #[error("connection counter underflow for server: {id}")]
    CounterUnderflow { id: String },

    /// Invalid balancer configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl BalancerError {
    /// Create a duplicate-server error
    pub fn duplicate_server<S: Into<String>>(id: S) -> Self {
        Self::DuplicateServer { id: id.into() }
    }

    /// Create an unknown-server error
    pub fn unknown_server<S: Into<String>>(id: S) -> Self {
        Self::UnknownServer { id: id.into() }
    }

    /// Create a server-busy error
    pub fn server_busy<S: Into<String>>(id: S, active: u64) -> Self {
        Self::ServerBusy {
            id: id.into(),
            active,
        }
    }

    /// Create a counter-underflow error
    pub fn underflow<S: Into<String>>(id: S) -> Self {
        Self::CounterUnderflow { id: id.into() }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Get a string representation of the error type for structured reporting
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::DuplicateServer { .. } => "duplicate_server",
            Self::UnknownServer { .. } => "unknown_server",
            Self::ServerBusy { .. } => "server_busy",
            Self::NoServersAvailable => "no_servers_available",
            Self::CounterUnderflow { .. } => "counter_underflow",
            Self::Configuration { .. } => "configuration_error",
        }
    }

    /// Check if this error should be retried
    ///
    /// Capacity errors are transient: the pool may gain servers or drain
    /// connections, so the caller can back off and retry. Configuration and
    /// protocol errors are caller bugs and will not go away on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoServersAvailable | Self::ServerBusy { .. })
    }
}
