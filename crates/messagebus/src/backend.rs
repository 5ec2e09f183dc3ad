// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend capability interface.
//!
//! Every transport backend implements [`Backend`]. The façade only talks to
//! this trait, so it never needs to know which broker technology is in use.
//!
//! # Thread Safety
//!
//! All methods take `&self` and may be called concurrently from any thread,
//! including from inside a [`Listener`] running on the backend's delivery
//! thread. The one exception is [`Backend::request`]: calling it from a
//! listener blocks the thread that would deliver the reply.

use crate::error::Result;
use crate::message::Message;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with each message delivered on a topic or queue.
///
/// Listeners run on the backend's delivery thread. A panicking listener is
/// caught and logged; it does not stop delivery to other listeners.
pub type Listener = Arc<dyn Fn(Message) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(Message) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Contract implemented by every transport backend.
pub trait Backend: Send + Sync {
    /// Parse backend options and open the transport session.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if required options are missing
    /// - [`Error::Connect`](crate::Error::Connect) if the session cannot be established
    fn connect(&self, connection: &str) -> Result<()>;

    /// Send `message` to `queue` and block until the correlated reply arrives.
    ///
    /// A correlation id is generated when the message has none. Concurrent
    /// calls on one backend are serialized.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`](crate::Error::Validation) if `message.meta.to` is empty
    /// - [`Error::Timeout`](crate::Error::Timeout) if no reply arrives within `timeout`
    fn request(&self, queue: &str, message: Message, timeout: Duration) -> Result<Message>;

    /// Register `listener` for broadcasts on `topic`.
    fn subscribe(&self, topic: &str, listener: Listener) -> Result<()>;

    /// Remove the listener registered for `topic`.
    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Broadcast `message` on `topic`.
    ///
    /// A backend may bind itself to the first topic it publishes on; later
    /// publishes to another topic fail with
    /// [`Error::TopicConflict`](crate::Error::TopicConflict).
    fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// Register `listener` for point-to-point delivery on `queue`.
    fn receive(&self, queue: &str, listener: Listener) -> Result<()>;

    /// Send a reply. `message.meta.correlation_id` must be set.
    fn send_reply(&self, queue: &str, message: Message) -> Result<()>;

    /// Send a request without waiting for the reply.
    fn send_request(&self, queue: &str, message: Message) -> Result<()>;

    /// Register `listener` on `message.meta.reply_to`, then send the request.
    fn send_request_with_listener(
        &self,
        queue: &str,
        message: Message,
        listener: Listener,
    ) -> Result<()>;

    /// Identity on the transport, empty until connected.
    fn identity(&self) -> String;

    /// Stop the delivery loop and release the session. Idempotent.
    fn close(&self);
}
