// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelope exchanged over the bus.
//!
//! A [`Message`] is a metadata envelope ([`Meta`]) plus an ordered list of
//! opaque payload segments. Backends fill in `from`, `reply_to`, `timeout` and
//! `correlation_id` on the outbound path; everything else belongs to the
//! caller.
//!
//! With the `serde` feature the envelope serializes with the keys other bus
//! implementations use: `meta-data`/`user-data` at the top, `reply-to`,
//! `correlation-id` and friends inside, and the status as `"ok"`/`"ko"`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Processing status carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// Request handled (default).
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "ok"))]
    Ok,
    /// Request failed; payload usually describes why.
    #[cfg_attr(feature = "serde", serde(rename = "ko"))]
    Error,
}

impl Status {
    /// Wire representation (`"ok"` / `"ko"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "ko",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ok" => Ok(Self::Ok),
            "ko" => Ok(Self::Error),
            other => Err(Error::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// Envelope fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct Meta {
    /// Queue/address responses should be sent to.
    pub reply_to: String,
    /// Sender identity.
    pub from: String,
    /// Destination identity.
    pub to: String,
    /// Topic/queue discriminator.
    pub subject: String,
    /// Processing status.
    pub status: Status,
    /// Request timeout in milliseconds.
    pub timeout: i32,
    /// Request/reply pairing key.
    pub correlation_id: String,
}

/// A message: envelope plus ordered payload segments.
///
/// # Example
///
/// ```rust
/// use messagebus::Message;
///
/// let mut msg = Message::with_data(["first", "second"]);
/// msg.meta.to = "pong".to_string();
/// assert_eq!(msg.data(), ["first", "second"]);
///
/// msg.set_data("only");
/// assert_eq!(msg.data(), ["only"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Message {
    /// Envelope fields.
    #[cfg_attr(feature = "serde", serde(rename = "meta-data"))]
    pub meta: Meta,
    /// Payload segments, order preserved end to end.
    #[cfg_attr(feature = "serde", serde(rename = "user-data"))]
    pub user_data: Vec<String>,
}

impl Message {
    /// Empty message with default envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Message whose payload is the given segments, in order.
    pub fn with_data<I, S>(data: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut msg = Self::new();
        msg.set_data_list(data);
        msg
    }

    /// Replace the payload with a single segment.
    pub fn set_data(&mut self, data: impl Into<String>) {
        self.user_data.clear();
        self.user_data.push(data.into());
    }

    /// Replace the payload with the given segments, in order.
    pub fn set_data_list<I, S>(&mut self, data: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_data.clear();
        self.user_data.extend(data.into_iter().map(Into::into));
    }

    /// Payload segments.
    pub fn data(&self) -> &[String] {
        &self.user_data
    }

    /// True when this message is the reply for the given correlation id.
    pub fn correlates_with(&self, correlation_id: &str) -> bool {
        !correlation_id.is_empty() && self.meta.correlation_id == correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_data_replaces_existing_payload() {
        let mut msg = Message::with_data(["a", "b", "c"]);
        msg.set_data("z");
        assert_eq!(msg.data(), ["z"]);

        msg.set_data_list(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(msg.data(), ["x", "y"]);

        msg.set_data_list(Vec::<String>::new());
        assert!(msg.data().is_empty());
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(Status::Ok.to_string(), "ok");
        assert_eq!(Status::Error.to_string(), "ko");
        assert_eq!("ko".parse::<Status>(), Ok(Status::Error));
        assert_eq!(" ok ".parse::<Status>(), Ok(Status::Ok));
        assert!(matches!(
            "maybe".parse::<Status>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn empty_correlation_never_matches() {
        let msg = Message::new();
        assert!(!msg.correlates_with(""));

        let mut msg = Message::new();
        msg.meta.correlation_id = "abc".into();
        assert!(msg.correlates_with("abc"));
        assert!(!msg.correlates_with("abd"));
    }
}
