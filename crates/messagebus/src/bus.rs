// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-facing message bus.
//!
//! [`MessageBus`] binds exactly one backend, obtained from the
//! [`PluginRegistry`] by provider, and forwards every operation to it.
//!
//! ```text
//! MessageBus --owns--> Arc<dyn Backend> <--weak-- BusHandle (inside listeners)
//! ```
//!
//! Dropping the bus closes the backend: the delivery thread is stopped and
//! joined before `drop` returns, so no listener fires afterwards.

use crate::backend::{Backend, Listener};
use crate::config::{DEFAULT_REQUEST_TIMEOUT, PLUGIN_PREFIX};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::PluginRegistry;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Backend technology to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// In-process broker (builtin with the `inproc` feature).
    Inproc,
    /// Malamute broker.
    Mlm,
    /// MQTT broker.
    Mqtt,
    /// AMQP broker.
    Amqp,
}

impl Provider {
    /// Short name of the provider.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Inproc => "inproc",
            Provider::Mlm => "mlm",
            Provider::Mqtt => "mqtt",
            Provider::Amqp => "amqp",
        }
    }

    /// Name of the backend module implementing this provider.
    pub fn module_name(self) -> String {
        format!("{}{}", PLUGIN_PREFIX, self.as_str())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fill in the reply envelope of `answer` from `request`.
fn address_reply(request: &Message, mut answer: Message) -> Message {
    answer.meta.correlation_id = request.meta.correlation_id.clone();
    answer.meta.to = request.meta.reply_to.clone();
    answer.meta.from = request.meta.to.clone();
    answer
}

/// Message bus bound to one backend.
///
/// # Example
///
/// ```rust
/// use messagebus::transport::inproc::Broker;
/// use messagebus::{Message, MessageBus, Provider};
///
/// let _broker = Broker::bind("inproc://bus-doc")?;
/// let bus = MessageBus::create(Provider::Inproc, "agent=doc;endpoint=inproc://bus-doc")?;
/// bus.subscribe("doc.events", |msg: Message| println!("{:?}", msg.data()))?;
/// bus.send("doc.events", Message::with_data(["hello"]))?;
/// # Ok::<(), messagebus::Error>(())
/// ```
pub struct MessageBus {
    backend: Arc<dyn Backend>,
    provider: Provider,
    request_timeout: Duration,
}

impl MessageBus {
    /// Bind `provider` through the global registry and connect.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] / [`Error::Symbol`] if the backend module cannot be loaded
    /// - [`Error::Config`] / [`Error::Connect`] from the backend's connect
    pub fn create(provider: Provider, connection: &str) -> Result<Self> {
        Self::builder(provider).connect(connection)
    }

    /// Create a builder for finer control.
    pub fn builder(provider: Provider) -> MessageBusBuilder<'static> {
        MessageBusBuilder::new(provider)
    }

    /// Send `message` to `queue` and wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `message.meta.to` is empty
    /// - [`Error::Timeout`] if no reply arrives in time
    pub fn request(&self, queue: &str, message: Message) -> Result<Message> {
        self.backend.request(queue, message, self.request_timeout)
    }

    /// Publish `message` on topic `queue`.
    pub fn send(&self, queue: &str, message: Message) -> Result<()> {
        self.backend.publish(queue, message)
    }

    /// Reply to `request` with `answer`.
    ///
    /// The answer's correlation id, `to` and `from` are taken from the request
    /// whatever they held before.
    pub fn reply(&self, queue: &str, request: &Message, answer: Message) -> Result<()> {
        self.backend.send_reply(queue, address_reply(request, answer))
    }

    /// Register `callback` for messages on `queue`.
    pub fn subscribe<F>(&self, queue: &str, callback: F) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        self.backend.subscribe(queue, listener)
    }

    /// Remove the callback registered for `queue`.
    pub fn unsubscribe(&self, queue: &str) -> Result<()> {
        self.backend.unsubscribe(queue)
    }

    /// Weak handle for use inside listeners.
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            backend: Arc::downgrade(&self.backend),
        }
    }

    /// Identity of this bus on the broker.
    pub fn identity(&self) -> String {
        self.backend.identity()
    }

    /// Provider this bus was created with.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Timeout applied by [`request`](Self::request).
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        log::debug!("{} - closing message bus", self.backend.identity());
        self.backend.close();
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("provider", &self.provider)
            .field("identity", &self.backend.identity())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Builder for [`MessageBus`].
pub struct MessageBusBuilder<'a> {
    provider: Provider,
    request_timeout: Duration,
    registry: Option<&'a PluginRegistry>,
}

impl<'a> MessageBusBuilder<'a> {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            registry: None,
        }
    }

    /// Timeout for [`MessageBus::request`] (default: 1000 ms).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load the backend from `registry` instead of the global one.
    pub fn registry<'b>(self, registry: &'b PluginRegistry) -> MessageBusBuilder<'b> {
        MessageBusBuilder {
            provider: self.provider,
            request_timeout: self.request_timeout,
            registry: Some(registry),
        }
    }

    /// Load the backend, connect it and return the bus.
    ///
    /// Nothing is kept on failure.
    pub fn connect(self, connection: &str) -> Result<MessageBus> {
        let registry = self.registry.unwrap_or(PluginRegistry::global());
        let factory = registry.load(&self.provider.module_name())?;
        let backend: Arc<dyn Backend> = Arc::from(factory.instantiate());

        if let Err(e) = backend.connect(connection) {
            backend.close();
            return Err(e);
        }
        log::debug!(
            "{} - message bus ready ({} provider)",
            backend.identity(),
            self.provider
        );

        Ok(MessageBus {
            backend,
            provider: self.provider,
            request_timeout: self.request_timeout,
        })
    }
}

/// Weak handle on a [`MessageBus`], usable from inside listeners.
///
/// Offers the non-blocking operations only. Once the bus is dropped every
/// call fails with [`Error::NotConnected`].
///
/// ```rust
/// use messagebus::transport::inproc::Broker;
/// use messagebus::{Message, MessageBus, Provider};
///
/// let _broker = Broker::bind("inproc://handle-doc")?;
/// let bus = MessageBus::create(Provider::Inproc, "agent=server;endpoint=inproc://handle-doc")?;
/// let handle = bus.handle();
/// bus.subscribe("server.queue", move |req: Message| {
///     let _ = handle.reply("server.queue", &req, Message::with_data(["ok"]));
/// })?;
/// # Ok::<(), messagebus::Error>(())
/// ```
#[derive(Clone)]
pub struct BusHandle {
    backend: Weak<dyn Backend>,
}

impl BusHandle {
    fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.backend
            .upgrade()
            .ok_or_else(|| Error::NotConnected("message bus has been dropped".to_string()))
    }

    /// See [`MessageBus::reply`].
    pub fn reply(&self, queue: &str, request: &Message, answer: Message) -> Result<()> {
        self.backend()?
            .send_reply(queue, address_reply(request, answer))
    }

    /// See [`MessageBus::send`].
    pub fn send(&self, queue: &str, message: Message) -> Result<()> {
        self.backend()?.publish(queue, message)
    }

    /// True while the bus is alive.
    pub fn is_alive(&self) -> bool {
        self.backend.strong_count() > 0
    }
}

impl fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
