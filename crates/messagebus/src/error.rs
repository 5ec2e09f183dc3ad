// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for message bus operations.
//!
//! Every public operation returns [`Result`]; nothing on the public surface
//! panics. Each variant carries a human-readable detail string so callers can
//! log the failure without matching on it.

use std::fmt;

/// Errors returned by message bus operations.
///
/// # Example
///
/// ```rust
/// use messagebus::{Error, ErrorKind, MessageBus, Provider};
///
/// match MessageBus::create(Provider::Inproc, "agent=client") {
///     Err(e) => assert_eq!(e.kind(), ErrorKind::Config),
///     Ok(_) => unreachable!("endpoint is missing"),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Malformed or missing connection parameters.
    Config(String),
    /// Transport session could not be established.
    Connect(String),
    /// Backend module not found in any search location.
    NotFound(String),
    /// Backend module found but its entry point is missing.
    Symbol {
        /// Module that was searched.
        module: String,
        /// Entry point that could not be resolved.
        symbol: String,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation requires a running delivery loop (not connected, or closed).
    NotConnected(String),
    /// Operation is invalid in the current state (e.g. connecting twice).
    InvalidState(String),

    // ========================================================================
    // Message Errors
    // ========================================================================
    /// A required message field is missing or invalid.
    Validation(String),
    /// A reply was sent without a correlation id.
    MissingCorrelation,
    /// A request expecting a listener reply has no `reply_to` queue.
    MissingReplyTo,
    /// Synchronous request exceeded its deadline.
    Timeout(String),

    // ========================================================================
    // Subscription Errors
    // ========================================================================
    /// Topic already has a subscriber on this backend.
    AlreadySubscribed(String),
    /// Topic was never subscribed on this backend.
    NotSubscribed(String),
    /// Queue already has a receiver on this backend.
    AlreadyRegistered(String),
    /// Backend is bound to another publish topic.
    TopicConflict {
        /// Topic bound by the first publish.
        bound: String,
        /// Topic requested by the failing publish.
        requested: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport driver refused to send.
    SendFailed(String),
    /// Unexpected failure in the native layer.
    Internal(String),
}

/// Fieldless discriminant of [`Error`], for callers that only branch on the
/// failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Connect,
    NotFound,
    Symbol,
    NotConnected,
    InvalidState,
    Validation,
    MissingCorrelation,
    MissingReplyTo,
    Timeout,
    AlreadySubscribed,
    NotSubscribed,
    AlreadyRegistered,
    TopicConflict,
    SendFailed,
    Internal,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Connect(_) => ErrorKind::Connect,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Symbol { .. } => ErrorKind::Symbol,
            Error::NotConnected(_) => ErrorKind::NotConnected,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Validation(_) => ErrorKind::Validation,
            Error::MissingCorrelation => ErrorKind::MissingCorrelation,
            Error::MissingReplyTo => ErrorKind::MissingReplyTo,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::AlreadySubscribed(_) => ErrorKind::AlreadySubscribed,
            Error::NotSubscribed(_) => ErrorKind::NotSubscribed,
            Error::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Error::TopicConflict { .. } => ErrorKind::TopicConflict,
            Error::SendFailed(_) => ErrorKind::SendFailed,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Setup
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Connect(msg) => write!(f, "Connect failed: {}", msg),
            Error::NotFound(name) => {
                write!(f, "Backend module '{}' not found in any search location", name)
            }
            Error::Symbol { module, symbol } => {
                write!(f, "Cannot resolve function '{}' from {}", symbol, module)
            }
            // State
            Error::NotConnected(msg) => write!(f, "Not connected: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            // Message
            Error::Validation(msg) => write!(f, "Invalid message: {}", msg),
            Error::MissingCorrelation => write!(f, "Reply must have a correlation id"),
            Error::MissingReplyTo => write!(f, "Request must have a reply to queue"),
            Error::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            // Subscription
            Error::AlreadySubscribed(topic) => write!(f, "Already subscribed to '{}'", topic),
            Error::NotSubscribed(topic) => {
                write!(f, "Trying to unsubscribe on non-subscribed topic '{}'", topic)
            }
            Error::AlreadyRegistered(queue) => {
                write!(f, "Already have queue '{}' mapped to a listener", queue)
            }
            Error::TopicConflict { bound, requested } => write!(
                f,
                "Publishing to '{}' refused: backend is bound to topic '{}'",
                requested, bound
            ),
            // Transport
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
