// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus configuration: defaults and connection-string parsing.
//!
//! # Connection string
//!
//! `key=value` pairs separated by `;`. Whitespace around keys and values is
//! ignored, unknown keys are ignored.
//!
//! | Key        | Required | Meaning                                   |
//! |------------|----------|-------------------------------------------|
//! | `agent`    | yes      | Identity of this client on the broker     |
//! | `endpoint` | yes      | Broker address                            |
//! | `timeout`  | no       | Connect timeout in milliseconds           |
//!
//! ```rust
//! use messagebus::config::ConnectionOptions;
//!
//! let opts = ConnectionOptions::parse("agent=ping; endpoint=inproc://bus")?;
//! assert_eq!(opts.agent, "ping");
//! assert_eq!(opts.endpoint, "inproc://bus");
//! # Ok::<(), messagebus::Error>(())
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// Timeout applied by [`MessageBus::request`](crate::MessageBus::request).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for opening a transport session when `timeout` is not given.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Entry point every backend module must export.
pub const PLUGIN_ENTRY_POINT: &str = "plugin_instance";

/// Prefix of backend module names (`libplugin-<kind>`).
pub const PLUGIN_PREFIX: &str = "libplugin-";

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Identity on the broker.
    pub agent: String,
    /// Broker address.
    pub endpoint: String,
    /// Session establishment timeout.
    pub connect_timeout: Duration,
}

impl ConnectionOptions {
    /// Parse a `key=value;key=value` connection string.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `agent` or `endpoint` is missing or empty, or
    /// when `timeout` is not a number of milliseconds.
    pub fn parse(connection: &str) -> Result<Self> {
        let mut agent = None;
        let mut endpoint = None;
        let mut connect_timeout = DEFAULT_CONNECT_TIMEOUT;

        for option in connection.split(';') {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let Some((key, value)) = option.split_once('=') else {
                log::debug!("Ignoring malformed connection option '{}'", option);
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "agent" => agent = Some(value.to_string()),
                "endpoint" => endpoint = Some(value.to_string()),
                "timeout" => {
                    let ms = value.parse::<u64>().map_err(|_| {
                        Error::Config(format!("timeout '{}' is not a number of milliseconds", value))
                    })?;
                    connect_timeout = Duration::from_millis(ms);
                }
                other => log::debug!("Ignoring unknown connection option '{}'", other),
            }
        }

        let agent = agent.filter(|a| !a.is_empty());
        let endpoint = endpoint.filter(|e| !e.is_empty());
        match (agent, endpoint) {
            (Some(agent), Some(endpoint)) => Ok(Self {
                agent,
                endpoint,
                connect_timeout,
            }),
            (None, _) => Err(Error::Config(format!(
                "Wrong parameters: 'agent' is required in '{}'",
                connection
            ))),
            (_, None) => Err(Error::Config(format!(
                "Wrong parameters: 'endpoint' is required in '{}'",
                connection
            ))),
        }
    }
}
