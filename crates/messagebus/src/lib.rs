// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # messagebus - broker-agnostic request/reply and publish/subscribe
//!
//! Applications talk to a [`MessageBus`]; the bus binds exactly one backend,
//! loaded by provider from the [`PluginRegistry`], and the backend talks to a
//! broker through a transport driver.
//!
//! ## Quick Start
//!
//! ```rust
//! use messagebus::transport::inproc::Broker;
//! use messagebus::{Message, MessageBus, Provider, Result};
//!
//! fn main() -> Result<()> {
//!     let _broker = Broker::bind("inproc://quick-start")?;
//!
//!     let server = MessageBus::create(Provider::Inproc, "agent=pong;endpoint=inproc://quick-start")?;
//!     let handle = server.handle();
//!     server.subscribe("play", move |ping: Message| {
//!         let mut pong = Message::new();
//!         pong.set_data(format!("Pong on ping {}", ping.data()[0]));
//!         let _ = handle.reply("play", &ping, pong);
//!     })?;
//!
//!     let client = MessageBus::create(Provider::Inproc, "agent=ping;endpoint=inproc://quick-start")?;
//!     let mut ping = Message::with_data(["some data"]);
//!     ping.meta.to = "pong".into();
//!     let pong = client.request("play", ping)?;
//!     assert_eq!(pong.data(), ["Pong on ping some data"]);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |  MessageBus (bus)        request / send / reply / subscribe   |
//! +---------------------------------------------------------------+
//! |  PluginRegistry (registry)   libplugin-<kind> -> factory      |
//! +---------------------------------------------------------------+
//! |  Backend (backend)  <- BrokerBackend (broker)                 |
//! |     correlation slot, subscription table, delivery thread     |
//! +---------------------------------------------------------------+
//! |  TransportDriver / Session (transport)   inproc broker        |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Features
//!
//! - `inproc` (default): in-process broker driver and the builtin
//!   `libplugin-inproc` module.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger.

/// Backend capability interface and listener type.
pub mod backend;
/// Reference backend over a mailbox + stream broker.
pub mod broker;
/// Application-facing message bus.
pub mod bus;
/// Defaults and connection-string parsing.
pub mod config;
/// Error types.
pub mod error;
/// Message envelope and payload.
pub mod message;
/// Backend module registry.
pub mod registry;
/// Transport driver contract and drivers.
pub mod transport;

pub use backend::{listener, Backend, Listener};
pub use broker::{BrokerBackend, ConnectionState};
pub use bus::{BusHandle, MessageBus, MessageBusBuilder, Provider};
pub use config::ConnectionOptions;
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, Meta, Status};
pub use registry::{BackendFactory, Module, PluginRegistry};
